//! Services the provider depends on, injected at construction.

use super::error::ContextFiltersError;
use super::refresh::RefetchIntervalHint;
use super::rules::RawContextFilters;
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;

/// Result of one rule-document fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// `Ok(None)` means the backend has no filters configured.
    pub filters: Result<Option<RawContextFilters>, ContextFiltersError>,
    pub hint: RefetchIntervalHint,
}

#[async_trait]
pub trait ContextFiltersFetcher: Send + Sync {
    async fn fetch_context_filters(&self, cancel: CancellationToken) -> FetchOutcome;
}

/// Maps a local file URI to the remote repositories containing it.
#[async_trait]
pub trait RepoNameResolver: Send + Sync {
    async fn repo_names_for_uri(
        &self,
        uri: &Url,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<String>>;
}

/// Editor-level exclude globs for the workspace folder owning a URI.
///
/// Globs are compiled once on construction; invalid ones are logged and
/// skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludePatterns {
    workspace_folder: PathBuf,
    patterns: Vec<Pattern>,
}

impl ExcludePatterns {
    const MATCH_OPTIONS: MatchOptions = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    pub fn new<I, S>(workspace_folder: impl Into<PathBuf>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref();
                match Pattern::new(raw) {
                    Ok(pattern) => Some(pattern),
                    Err(err) => {
                        warn!(pattern = %raw, error = %err, "skipping invalid exclude glob");
                        None
                    }
                }
            })
            .collect();

        Self {
            workspace_folder: workspace_folder.into(),
            patterns,
        }
    }

    pub fn workspace_folder(&self) -> &Path {
        &self.workspace_folder
    }

    /// The globs that compiled.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Pattern::as_str)
    }

    /// Whether `path`, relative to the workspace folder, or one of its parent
    /// directories matches a pattern. Paths outside the folder never match.
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.workspace_folder) else {
            return false;
        };

        relative
            .ancestors()
            .filter(|candidate| !candidate.as_os_str().is_empty())
            .any(|candidate| {
                self.patterns
                    .iter()
                    .any(|pattern| pattern.matches_path_with(candidate, Self::MATCH_OPTIONS))
            })
    }
}

/// Looks up the exclude globs that apply to a URI. Implementations should
/// hand out a shared, already compiled set.
pub trait ExcludePatternProvider: Send + Sync {
    fn exclude_patterns(&self, uri: &Url) -> Option<Arc<ExcludePatterns>>;
}

/// Provider for hosts without editor exclude settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExcludePatterns;

impl ExcludePatternProvider for NoExcludePatterns {
    fn exclude_patterns(&self, _uri: &Url) -> Option<Arc<ExcludePatterns>> {
        None
    }
}
