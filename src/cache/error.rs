use std::sync::Arc;

/// Outcome of a failed [`ResultCache::get`](super::ResultCache::get).
///
/// Cloned to every caller sharing the fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("fetch failed: {0:#}")]
    Fetch(Arc<anyhow::Error>),
    #[error("fetch cancelled")]
    Cancelled,
}

impl CacheError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        Self::Fetch(Arc::new(error))
    }
}
