//! Logging configuration and initialization

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Filter env var, checked before `RUST_LOG`
pub const LOG_ENV: &str = "EFFECT_STACK_LOG";

/// Set to "json" for JSON output
pub const LOG_FORMAT_ENV: &str = "EFFECT_STACK_LOG_FORMAT";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Console output (default: true)
    pub console: bool,
    /// Mirror logs into this file (default: none)
    pub file: Option<PathBuf>,
    /// JSON lines on the console (default: false)
    pub json: bool,
    /// Filter used when no env var is set (default: "info")
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: None,
            json: false,
            default_level: "info".to_string(),
        }
    }
}

/// JSON output wins if the format env var says so
fn use_json(format_env: Option<String>, config: &LogConfig) -> bool {
    format_env.map_or(config.json, |v| v.eq_ignore_ascii_case("json"))
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

/// Initialize the global subscriber
///
/// Returns the file writer guard when file output is enabled; keep it alive
/// until exit so buffered lines are flushed.
///
/// # Environment Variables
///
/// - `EFFECT_STACK_LOG`: filter (e.g. "debug", "info,effect_stack=trace")
/// - `EFFECT_STACK_LOG_FORMAT`: "json" for JSON output
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let json = use_json(std::env::var(LOG_FORMAT_ENV).ok(), config);
    let subscriber = tracing_subscriber::registry().with(env_filter(config));

    let mut file_guard = None;
    let file_layer = match &config.file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            file_guard = Some(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let (json_layer, compact_layer) = match (config.console, json) {
        (true, true) => (Some(fmt::layer().json().with_target(true).with_file(true).with_line_number(true)), None),
        (true, false) => (None, Some(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())),
        (false, _) => (None, None),
    };

    subscriber
        .with(file_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()?;

    tracing::info!(
        target: "effect_stack",
        version = env!("CARGO_PKG_VERSION"),
        json,
        file = ?config.file,
        "Logging initialized"
    );

    Ok(file_guard)
}

// Re-export WorkerGuard so callers can store it
pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console);
        assert!(config.file.is_none());
        assert!(!config.json);
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_format_env_overrides_config() {
        let config = LogConfig::default();
        assert!(use_json(Some("JSON".into()), &config));
        assert!(!use_json(Some("compact".into()), &config));

        let json_config = LogConfig {
            json: true,
            ..LogConfig::default()
        };
        assert!(use_json(None, &json_config));
    }
}
