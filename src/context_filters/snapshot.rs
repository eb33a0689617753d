use super::rules::{FilterRules, RawContextFilters};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;

/// One immutable rule set together with its own decision cache.
///
/// A new rule set always comes with a new, empty cache, so readers never see
/// decisions made under different rules.
#[derive(Debug)]
pub struct FilterSnapshot {
    rules: FilterRules,
    decisions: Mutex<LruCache<String, bool>>,
}

impl FilterSnapshot {
    pub fn new(rules: FilterRules, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            rules,
            decisions: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn uninitialized(capacity: usize) -> Self {
        Self::new(FilterRules::Uninitialized, capacity)
    }

    pub fn rules(&self) -> &FilterRules {
        &self.rules
    }

    pub fn is_repo_name_ignored(&self, repo_name: &str) -> bool {
        if let Some(ignored) = self.decisions.lock().get(repo_name) {
            return *ignored;
        }

        let ignored = self.rules.is_repo_name_ignored(repo_name);
        self.decisions.lock().put(repo_name.to_string(), ignored);
        ignored
    }

    pub fn cached_decisions(&self) -> usize {
        self.decisions.lock().len()
    }

    pub fn view(&self) -> SnapshotView {
        let (raw, error) = match &self.rules {
            FilterRules::Restricted(rules) => (Some(rules.raw().clone()), None),
            FilterRules::Failed(error) => (None, Some(error.to_string())),
            _ => (None, None),
        };
        SnapshotView {
            state: self.rules.kind(),
            raw,
            error,
            cached_decisions: self.cached_decisions(),
        }
    }
}

/// Serializable summary of the active rules, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotView {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawContextFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cached_decisions: usize,
}
