//! Configuration types shared by the `ctxwire` runtime.
//!
//! Every section deserializes from TOML with per-field defaults, so an empty
//! document yields a usable configuration. Call [`CtxwireConfig::validate`]
//! after loading to reject values the runtime cannot honour.

pub mod context_filters;
pub mod loader;
pub mod logging;
pub mod result_cache;
pub mod streaming;

pub use context_filters::{ContextFiltersConfig, IntervalHintConfig, RefetchConfig};
pub use logging::{LogLevel, LoggingConfig};
pub use result_cache::ResultCacheConfig;
pub use streaming::StreamingConfig;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CtxwireConfig {
    #[serde(default)]
    pub context_filters: ContextFiltersConfig,
    #[serde(default)]
    pub result_cache: ResultCacheConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CtxwireConfig {
    pub fn validate(&self) -> Result<()> {
        self.context_filters.validate()?;
        self.result_cache.validate()?;
        Ok(())
    }
}
