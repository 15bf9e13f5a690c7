//! Logging setup for the binaries and the lifecycle events they share.
//!
//! Events go to stderr: `render_feature_sql` and the preview helpers write
//! SQL and tables to stdout, and those streams must stay clean enough to pipe.

use std::env;
use std::io;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// HTTP stack crates that log every connection at `info`/`debug` during a
/// competition download.
const QUIET_DEPENDENCIES: [&str; 4] = ["reqwest", "hyper", "hyper_util", "rustls"];

const LEVEL_VAR: &str = "PROPENSITY_LOG_LEVEL";
const FORMAT_VAR: &str = "PROPENSITY_LOG_FORMAT";
const TARGET_VAR: &str = "PROPENSITY_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// A bare level (`debug`) or a full `EnvFilter` directive list.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
    /// `(variable, value)` pairs that were set but could not be parsed.
    pub rejected: Vec<(&'static str, String)>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_target: false,
            rejected: Vec::new(),
        }
    }
}

impl LoggingConfig {
    /// Builds the config from any variable source; unset and blank variables
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |name: &str| {
            lookup(name)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(level) = read(LEVEL_VAR) {
            if EnvFilter::try_new(&level).is_ok() {
                config.level = level;
            } else {
                config.rejected.push((LEVEL_VAR, level));
            }
        }
        if let Some(raw) = read(FORMAT_VAR) {
            match LogFormat::parse(&raw) {
                Some(format) => config.format = format,
                None => config.rejected.push((FORMAT_VAR, raw)),
            }
        }
        if let Some(raw) = read(TARGET_VAR) {
            match parse_switch(&raw) {
                Some(include) => config.include_target = include,
                None => config.rejected.push((TARGET_VAR, raw)),
            }
        }

        config
    }

    /// The filter handed to the subscriber. A bare level also caps the HTTP
    /// stack at `warn`; explicit directives are used as written.
    pub fn filter_directives(&self) -> String {
        if self.level.contains('=') {
            return self.level.clone();
        }
        let mut directives = vec![self.level.clone()];
        directives.extend(QUIET_DEPENDENCIES.iter().map(|krate| format!("{krate}=warn")));
        directives.join(",")
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    LoggingConfig::from_lookup(|name| env::var(name).ok())
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter = EnvFilter::try_new(config.filter_directives())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

/// First event every binary emits once logging is up. Settings that were
/// ignored while building `config` are reported here, since nothing could be
/// logged before the subscriber existed.
pub fn log_app_start(component: &str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
    for (variable, value) in &config.rejected {
        warn!(
            component,
            event = "app.logging.setting_ignored",
            variable = *variable,
            value = %value
        );
    }
}

/// Records which data source a run reads from.
pub fn log_source_selected(component: &str, source: &str, location: &str) {
    info!(component, event = "source.selected", source, location);
}

pub fn log_app_finish(component: &str, rows: usize) {
    info!(component, event = "app.finish", rows);
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
