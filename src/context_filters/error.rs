/// Why the rule document could not be loaded.
///
/// Every variant except [`UnsupportedBackend`](Self::UnsupportedBackend)
/// makes the provider deny all context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextFiltersError {
    /// The backend predates the rule query; treated as "no filters".
    #[error("backend does not support context filters")]
    UnsupportedBackend,
    #[error("network error while fetching context filters: {0}")]
    Network(String),
    #[error("context filters request failed with HTTP {status}")]
    Http { status: u16 },
    #[error("backend error while fetching context filters: {0}")]
    Backend(String),
    #[error("malformed context filters document: {0}")]
    MalformedResponse(String),
    #[error("invalid repository pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("context filters have not been loaded")]
    NotLoaded,
    #[error("context filters fetch was cancelled")]
    Cancelled,
}
