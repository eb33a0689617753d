use super::error::ContextFiltersError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFilterItem {
    #[serde(rename = "repoNamePattern")]
    pub repo_name_pattern: String,
}

impl ContextFilterItem {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            repo_name_pattern: pattern.into(),
        }
    }
}

/// Rule document as published by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContextFilters {
    #[serde(default)]
    pub include: Option<Vec<ContextFilterItem>>,
    #[serde(default)]
    pub exclude: Option<Vec<ContextFilterItem>>,
}

impl RawContextFilters {
    pub fn new<I, E>(include: Option<I>, exclude: Option<E>) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.map(to_items),
            exclude: exclude.map(to_items),
        }
    }
}

fn to_items<T>(patterns: T) -> Vec<ContextFilterItem>
where
    T: IntoIterator,
    T::Item: Into<String>,
{
    patterns.into_iter().map(ContextFilterItem::new).collect()
}

/// Compiled include/exclude patterns.
///
/// Patterns match anywhere in the repository name.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    raw: RawContextFilters,
    include: Option<Vec<Regex>>,
    exclude: Option<Vec<Regex>>,
}

impl CompiledRules {
    pub fn compile(raw: RawContextFilters) -> Result<Self, ContextFiltersError> {
        let include = compile_items(raw.include.as_deref())?;
        let exclude = compile_items(raw.exclude.as_deref())?;
        Ok(Self {
            raw,
            include,
            exclude,
        })
    }

    pub fn raw(&self) -> &RawContextFilters {
        &self.raw
    }

    pub fn is_repo_name_ignored(&self, repo_name: &str) -> bool {
        let mut ignored = false;

        if let Some(include) = &self.include {
            ignored = !include.iter().any(|pattern| pattern.is_match(repo_name));
        }

        if let Some(exclude) = &self.exclude
            && exclude.iter().any(|pattern| pattern.is_match(repo_name))
        {
            ignored = true;
        }

        ignored
    }
}

fn compile_items(
    items: Option<&[ContextFilterItem]>,
) -> Result<Option<Vec<Regex>>, ContextFiltersError> {
    items
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    Regex::new(&item.repo_name_pattern).map_err(|err| {
                        ContextFiltersError::InvalidPattern {
                            pattern: item.repo_name_pattern.clone(),
                            message: err.to_string(),
                        }
                    })
                })
                .collect()
        })
        .transpose()
}

/// Active policy state.
#[derive(Debug, Clone, Default)]
pub enum FilterRules {
    /// Nothing fetched yet; everything is ignored.
    #[default]
    Uninitialized,
    /// Filters are not configured or not supported by the backend.
    Unrestricted,
    /// The document could not be honoured; everything is ignored.
    DenyAll,
    Restricted(CompiledRules),
    /// The last fetch failed; everything is ignored.
    Failed(ContextFiltersError),
}

impl FilterRules {
    /// Map a fetch outcome to the rules it activates.
    pub fn from_fetch(result: Result<Option<RawContextFilters>, ContextFiltersError>) -> Self {
        match result {
            Ok(None) => Self::Unrestricted,
            Ok(Some(raw)) => match CompiledRules::compile(raw) {
                Ok(rules) => Self::Restricted(rules),
                Err(error) => {
                    warn!(error = %error, "context filters contain an invalid pattern; denying all context");
                    Self::DenyAll
                }
            },
            Err(ContextFiltersError::UnsupportedBackend) => Self::Unrestricted,
            Err(error) => {
                warn!(error = %error, "failed to load context filters; denying all context");
                Self::Failed(error)
            }
        }
    }

    pub fn is_repo_name_ignored(&self, repo_name: &str) -> bool {
        match self {
            Self::Unrestricted => false,
            Self::Restricted(rules) => rules.is_repo_name_ignored(repo_name),
            Self::Uninitialized | Self::DenyAll | Self::Failed(_) => true,
        }
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Unrestricted => "unrestricted",
            Self::DenyAll => "deny-all",
            Self::Restricted(_) => "restricted",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether both values would make identical decisions.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Uninitialized, Self::Uninitialized)
            | (Self::Unrestricted, Self::Unrestricted)
            | (Self::DenyAll, Self::DenyAll) => true,
            (Self::Restricted(left), Self::Restricted(right)) => left.raw == right.raw,
            (Self::Failed(left), Self::Failed(right)) => left == right,
            _ => false,
        }
    }
}
