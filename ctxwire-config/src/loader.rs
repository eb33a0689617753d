use crate::CtxwireConfig;
use anyhow::{Context, Result};
use std::path::Path;

impl CtxwireConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).context("Failed to parse ctxwire config")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogLevel;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CtxwireConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, CtxwireConfig::default());
        assert_eq!(config.context_filters.cache_capacity, 128);
        assert_eq!(config.result_cache.max_age_ms, 60_000);
        assert!(!config.streaming.aggregate_repeated_completions);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = CtxwireConfig::from_toml_str(
            r#"
            [context_filters]
            cache_capacity = 16

            [context_filters.refetch.transient]
            initial_interval_ms = 2000
            backoff = 3.0

            [streaming]
            aggregate_repeated_completions = true

            [logging]
            level = "debug"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.context_filters.cache_capacity, 16);
        assert_eq!(
            config.context_filters.refetch.transient.initial_interval_ms,
            2000
        );
        assert_eq!(
            config.context_filters.refetch.success.initial_interval_ms,
            3_600_000
        );
        assert_eq!(
            config.context_filters.public_instance_hosts,
            vec!["sourcegraph.com".to_string()]
        );
        assert!(config.streaming.aggregate_repeated_completions);
        assert_eq!(config.logging.level, LogLevel::DEBUG);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let result = CtxwireConfig::from_toml_str(
            r#"
            [result_cache]
            retry_backoff_factor = 0.25
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let error = CtxwireConfig::from_toml_str("[logging]\nlevel = \"verbose\"")
            .expect_err("unknown level must fail");
        assert!(format!("{error:#}").contains("unknown log level"));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[result_cache]\nmax_age_ms = 500").expect("write config");

        let config = CtxwireConfig::load(file.path()).expect("config loads");
        assert_eq!(config.result_cache.max_age_ms, 500);
    }

    #[test]
    fn load_reports_missing_file() {
        let error = CtxwireConfig::load("/definitely/not/here.toml")
            .expect_err("missing file must fail");
        assert!(error.to_string().contains("Failed to read config file"));
    }
}
