//! Structured logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Verbosity for `ctxwire` targets when `RUST_LOG` is not set.
///
/// Accepts the `tracing` level names in any case, plus `off`. Unknown names
/// are a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogLevel(LevelFilter);

impl LogLevel {
    pub const OFF: Self = Self(LevelFilter::OFF);
    pub const ERROR: Self = Self(LevelFilter::ERROR);
    pub const WARN: Self = Self(LevelFilter::WARN);
    pub const INFO: Self = Self(LevelFilter::INFO);
    pub const DEBUG: Self = Self(LevelFilter::DEBUG);
    pub const TRACE: Self = Self(LevelFilter::TRACE);

    pub fn filter(self) -> LevelFilter {
        self.0
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::WARN
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LevelFilter::from_str(value.trim())
            .map(Self)
            .map_err(|_| format!("unknown log level `{value}`"))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.to_string()
    }
}

// `LevelFilter` prints levels in upper case and `off` in lower case.
impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Extra `target=level` directives, e.g. `"ctxwire::context_filters=debug"`.
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default = "LoggingConfig::default_ansi")]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            targets: Vec::new(),
            ansi: Self::default_ansi(),
        }
    }
}

impl LoggingConfig {
    const fn default_ansi() -> bool {
        true
    }

    /// Render the configuration as an `EnvFilter` directive string.
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![format!("ctxwire={}", self.level)];
        directives.extend(
            self.targets
                .iter()
                .map(|target| target.trim())
                .filter(|target| !target.is_empty())
                .map(str::to_string),
        );
        directives.join(",")
    }
}
