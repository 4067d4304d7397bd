//! Logging setup shared by the ETL binaries.
//!
//! The level applies to this crate's events; HTTP client and other dependency
//! events are held at `dependency_level` unless a full filter directive is
//! given instead of a bare level.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "spot_etl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// One line per event, for cron mail and container logs.
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Bare level (`debug`) or a full `EnvFilter` directive (`spot_etl=trace,reqwest=debug`).
    pub level: String,
    pub dependency_level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dependency_level: "warn".to_string(),
            format: LogFormat::Compact,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn filter_directives(&self) -> String {
        if self.level.contains('=') || self.level.contains(',') {
            return self.level.clone();
        }
        format!("{},{}={}", self.dependency_level, CRATE_TARGET, self.level)
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    logging_config_from_lookup(|name| env::var(name).ok())
}

/// Reads `SPOT_ETL_LOG_LEVEL`, `SPOT_ETL_LOG_DEPS_LEVEL`, `SPOT_ETL_LOG_FORMAT`
/// and `SPOT_ETL_LOG_TARGET` through `lookup`; unusable values keep defaults.
pub fn logging_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LoggingConfig {
    let mut config = LoggingConfig::default();
    let read = |name: &str| {
        lookup(name)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if let Some(level) = read("SPOT_ETL_LOG_LEVEL") {
        config.level = level;
    }
    if let Some(level) = read("SPOT_ETL_LOG_DEPS_LEVEL") {
        config.dependency_level = level;
    }
    if let Some(format) = read("SPOT_ETL_LOG_FORMAT").and_then(|raw| parse_log_format(&raw)) {
        config.format = format;
    }
    if let Some(include) = read("SPOT_ETL_LOG_TARGET").and_then(|raw| parse_bool(&raw)) {
        config.include_target = include;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{CRATE_TARGET}=info")));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(app: &str, config: &LoggingConfig) {
    info!(
        component = app,
        event = "app.start",
        filter = %config.filter_directives(),
        log_format = ?config.format
    );
}

pub fn log_store_selected(app: &str, kind: &str, location: &str) {
    info!(
        component = app,
        event = "store.selected",
        kind,
        location
    );
}

pub fn log_app_finish(app: &str, elapsed_ms: u64) {
    info!(component = app, event = "app.finish", elapsed_ms);
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
