use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the context-access policy engine.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContextFiltersConfig {
    /// Number of repository decisions kept per active rule set.
    #[serde(default = "ContextFiltersConfig::default_cache_capacity")]
    pub cache_capacity: usize,
    /// Hosts of public multi-tenant instances where the policy never applies.
    #[serde(default = "ContextFiltersConfig::default_public_instance_hosts")]
    pub public_instance_hosts: Vec<String>,
    /// URI schemes that are never checked against the policy.
    #[serde(default = "ContextFiltersConfig::default_always_allowed_schemes")]
    pub always_allowed_schemes: Vec<String>,
    /// Upper bound for the refetch delay after repeated backoff.
    #[serde(default = "ContextFiltersConfig::default_max_refetch_interval_ms")]
    pub max_refetch_interval_ms: u64,
    #[serde(default)]
    pub refetch: RefetchConfig,
}

impl Default for ContextFiltersConfig {
    fn default() -> Self {
        Self {
            cache_capacity: Self::default_cache_capacity(),
            public_instance_hosts: Self::default_public_instance_hosts(),
            always_allowed_schemes: Self::default_always_allowed_schemes(),
            max_refetch_interval_ms: Self::default_max_refetch_interval_ms(),
            refetch: RefetchConfig::default(),
        }
    }
}

impl ContextFiltersConfig {
    const fn default_cache_capacity() -> usize {
        128
    }

    fn default_public_instance_hosts() -> Vec<String> {
        vec!["sourcegraph.com".to_string()]
    }

    fn default_always_allowed_schemes() -> Vec<String> {
        vec!["http".to_string(), "https".to_string()]
    }

    const fn default_max_refetch_interval_ms() -> u64 {
        60 * 60 * 1_000
    }

    pub fn max_refetch_interval(&self) -> Duration {
        Duration::from_millis(self.max_refetch_interval_ms)
    }

    /// Whether `host` belongs to a public instance. Comparison ignores ASCII case.
    pub fn is_public_instance_host(&self, host: &str) -> bool {
        self.public_instance_hosts
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(host))
    }

    pub fn is_always_allowed_scheme(&self, scheme: &str) -> bool {
        self.always_allowed_schemes
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(scheme))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.cache_capacity > 0,
            "context_filters.cache_capacity must be greater than zero"
        );
        ensure!(
            self.max_refetch_interval_ms > 0,
            "context_filters.max_refetch_interval_ms must be greater than zero"
        );
        self.refetch.validate()
    }
}

/// Initial interval and backoff factor for one class of refetch hint.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct IntervalHintConfig {
    pub initial_interval_ms: u64,
    pub backoff: f64,
}

impl IntervalHintConfig {
    pub const fn new(initial_interval_ms: u64, backoff: f64) -> Self {
        Self {
            initial_interval_ms,
            backoff,
        }
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }
}

/// Refetch hint table keyed by the outcome class of the last fetch.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RefetchConfig {
    #[serde(default = "RefetchConfig::default_initial")]
    pub initial: IntervalHintConfig,
    #[serde(default = "RefetchConfig::default_success")]
    pub success: IntervalHintConfig,
    #[serde(default = "RefetchConfig::default_ephemeral")]
    pub ephemeral: IntervalHintConfig,
    #[serde(default = "RefetchConfig::default_transient")]
    pub transient: IntervalHintConfig,
    #[serde(default = "RefetchConfig::default_permanent")]
    pub permanent: IntervalHintConfig,
}

impl Default for RefetchConfig {
    fn default() -> Self {
        Self {
            initial: Self::default_initial(),
            success: Self::default_success(),
            ephemeral: Self::default_ephemeral(),
            transient: Self::default_transient(),
            permanent: Self::default_permanent(),
        }
    }
}

impl RefetchConfig {
    const ONE_SECOND_MS: u64 = 1_000;
    const ONE_MINUTE_MS: u64 = 60 * Self::ONE_SECOND_MS;
    const ONE_HOUR_MS: u64 = 60 * Self::ONE_MINUTE_MS;

    const fn default_initial() -> IntervalHintConfig {
        IntervalHintConfig::new(0, 1.0)
    }

    const fn default_success() -> IntervalHintConfig {
        IntervalHintConfig::new(Self::ONE_HOUR_MS, 1.0)
    }

    const fn default_ephemeral() -> IntervalHintConfig {
        IntervalHintConfig::new(5 * Self::ONE_SECOND_MS, 2.0)
    }

    const fn default_transient() -> IntervalHintConfig {
        IntervalHintConfig::new(Self::ONE_MINUTE_MS, 1.5)
    }

    const fn default_permanent() -> IntervalHintConfig {
        IntervalHintConfig::new(Self::ONE_HOUR_MS, 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, hint) in [
            ("initial", &self.initial),
            ("success", &self.success),
            ("ephemeral", &self.ephemeral),
            ("transient", &self.transient),
            ("permanent", &self.permanent),
        ] {
            ensure!(
                hint.backoff.is_finite() && hint.backoff >= 1.0,
                "context_filters.refetch.{name}.backoff must be a finite value >= 1.0"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_host_comparison_ignores_case() {
        let config = ContextFiltersConfig::default();
        assert!(config.is_public_instance_host("SourceGraph.com"));
        assert!(!config.is_public_instance_host("sourcegraph.example.com"));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config = ContextFiltersConfig::default();
        config.refetch.transient.backoff = 0.5;
        let error = config.validate().expect_err("backoff below 1.0 must fail");
        assert!(error.to_string().contains("transient"));
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = ContextFiltersConfig {
            cache_capacity: 0,
            ..ContextFiltersConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
