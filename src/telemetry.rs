//! Tracing subscriber setup for binaries and tests embedding `ctxwire`.

use ctxwire_config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level
/// and per-target directives.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let directives = config.filter_directives();
    EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("invalid logging directives {directives:?}: {err}; using defaults");
        EnvFilter::new(LoggingConfig::default().filter_directives())
    })
}

/// Install a global `fmt` subscriber writing to stderr.
///
/// Returns `false` if a global subscriber was already installed; the
/// existing one is kept.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(true);

    let init_result = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init();

    if let Err(err) = init_result {
        tracing::warn!(error = %err, "tracing already initialized; skipping ctxwire tracing setup");
        return false;
    }
    true
}
