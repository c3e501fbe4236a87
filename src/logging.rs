//! Logging setup
//!
//! Installs a global `tracing` subscriber writing to stderr, optionally also to a daily
//! rotated file. `RUST_LOG` overrides the configured level when set.

use crate::config::LoggingConfig;
use crate::error::{MappingError, Result};
use std::ffi::OsStr;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Parse a level name, accepting the npm-style names some deployments still use
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    match level.trim().to_lowercase().as_str() {
        "silly" => Ok(LevelFilter::TRACE),
        "verbose" | "http" => Ok(LevelFilter::DEBUG),
        "warning" => Ok(LevelFilter::WARN),
        other => other
            .parse()
            .map_err(|_| MappingError::config(format!("Invalid log level: {}", level))),
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(parse_level(&config.level)?.into())
        .from_env_lossy();

    let stderr_text = (!config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
    });
    let stderr_json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
    });

    let file_layer = match &config.file {
        Some(file_path) => {
            let directory = file_path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory).map_err(|e| {
                MappingError::config(format!(
                    "Cannot create log directory {}: {}",
                    directory.display(),
                    e
                ))
            })?;

            let file_appender = tracing_appender::rolling::daily(
                directory,
                file_path
                    .file_name()
                    .unwrap_or_else(|| OsStr::new("param-mapper.log")),
            );

            Some(
                fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_text)
        .with(stderr_json)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| MappingError::config(format!("Failed to install logger: {}", e)))
}
