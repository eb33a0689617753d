use super::error::ContextFiltersError;
use std::fmt;

/// Why a URI must not be used as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    NoRepoFound,
    NonFileUri,
    HasIgnoreEverythingFilters,
    ExcludePatternMatch,
    /// The named repository is filtered out.
    Repo(String),
    /// The rules could not be loaded.
    FetchFailed(ContextFiltersError),
}

impl IgnoreReason {
    pub fn repo_name(&self) -> Option<&str> {
        match self {
            Self::Repo(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRepoFound => f.write_str("no-repo-found"),
            Self::NonFileUri => f.write_str("non-file-uri"),
            Self::HasIgnoreEverythingFilters => f.write_str("has-ignore-everything-filters"),
            Self::ExcludePatternMatch => f.write_str("exclude-pattern-match"),
            Self::Repo(name) => write!(f, "repo:{name}"),
            Self::FetchFailed(error) => write!(f, "fetch-failed: {error}"),
        }
    }
}
