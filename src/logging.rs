//! # Structured Logging
//!
//! Environment-aware `tracing` setup. `RUST_LOG` wins when set; otherwise the
//! level follows the detected environment. `EVENT_LOOP_LOG_FORMAT=json`
//! switches the console output to one JSON object per line.

use crate::config::ConfigManager;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output shape of the console layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("EVENT_LOOP_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize logging once per process. Later calls are no-ops, and an
/// already-installed global subscriber is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));
        let format = LogFormat::from_env();

        let registry = tracing_subscriber::registry().with(filter);
        let installed = match format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(true),
                )
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().with_target(true).with_thread_ids(true))
                .try_init(),
        };

        if installed.is_err() {
            tracing::debug!("Global tracing subscriber already initialized; keeping it");
            return;
        }

        tracing::info!(
            environment = %environment,
            format = ?format,
            "Structured logging initialized"
        );
    });
}

/// Level used when `RUST_LOG` is unset
pub fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("test"), "warn");
        assert_eq!(default_log_level("development"), "debug");
        assert_eq!(default_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
