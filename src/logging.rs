//! Logging setup
//!
//! Log lines go to stderr, as text or JSON, and optionally to a daily rolling
//! JSON file. The filter comes from `ZERGBOT_LOG` (same syntax as `RUST_LOG`),
//! falling back to the configured default.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "ZERGBOT_LOG";

const LOG_FILE_PREFIX: &str = "zergbot.log";

/// Where and how to log
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `ZERGBOT_LOG` is unset or invalid
    pub default_filter: String,
    /// JSON lines on stderr instead of text
    pub json: bool,
    /// Directory for daily rolling JSON log files
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".into(),
            json: false,
            log_dir: None,
        }
    }
}

impl LogConfig {
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(&self.default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for as long as file logging should flush.
/// Calling this again after a subscriber is installed leaves the first one in
/// place.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (text_layer, json_layer) = if config.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        )
    };

    let installed = tracing_subscriber::registry()
        .with(config.filter())
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init();

    match installed {
        Ok(()) => {
            tracing::debug!(json = config.json, file = ?config.log_dir, "[Logging] Initialized");
            guard
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::default()
            .with_default_filter("debug")
            .with_log_dir(dir.path());

        let _first = init_logging(&config);
        assert!(init_logging(&LogConfig::default().json()).is_none());
    }

    #[test]
    fn test_bad_default_filter_falls_back() {
        let config = LogConfig::default().with_default_filter("[[[not a filter");
        let _ = config.filter();
    }
}
