use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Freshness and retry settings for coalesced remote queries.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResultCacheConfig {
    /// How long a successful value stays fresh, measured from fetch start.
    #[serde(default = "ResultCacheConfig::default_max_age_ms")]
    pub max_age_ms: u64,
    /// Delay before retrying after the first failed fetch.
    #[serde(default = "ResultCacheConfig::default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    /// Multiplier applied to the retry delay after each consecutive failure.
    #[serde(default = "ResultCacheConfig::default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "ResultCacheConfig::default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: Self::default_max_age_ms(),
            initial_retry_delay_ms: Self::default_initial_retry_delay_ms(),
            retry_backoff_factor: Self::default_retry_backoff_factor(),
            max_retry_delay_ms: Self::default_max_retry_delay_ms(),
        }
    }
}

impl ResultCacheConfig {
    const fn default_max_age_ms() -> u64 {
        60_000
    }

    const fn default_initial_retry_delay_ms() -> u64 {
        1_000
    }

    const fn default_retry_backoff_factor() -> f64 {
        2.0
    }

    const fn default_max_retry_delay_ms() -> u64 {
        5 * 60_000
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.retry_backoff_factor.is_finite() && self.retry_backoff_factor >= 1.0,
            "result_cache.retry_backoff_factor must be a finite value >= 1.0"
        );
        ensure!(
            self.max_retry_delay_ms >= self.initial_retry_delay_ms,
            "result_cache.max_retry_delay_ms must not be below initial_retry_delay_ms"
        );
        Ok(())
    }
}
