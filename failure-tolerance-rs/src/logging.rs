//! # Structured Logging
//!
//! Installs the global `tracing` subscriber for the agent process: an
//! `EnvFilter` (overridable with `RUST_LOG`), text or JSON formatting and an
//! optional daily rolling log file.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use shared_types_rs::AgentSettings;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::types::{FailureToleranceError, Result};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub service_name: String,
    pub file_output: bool,
    pub log_dir: Option<String>,
    pub json_format: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "voice-agent".to_string(),
            file_output: false,
            log_dir: None,
            json_format: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Level and format taken from the agent settings
    pub fn for_agent(settings: &AgentSettings) -> Self {
        Self {
            level: settings.log_level.clone(),
            json_format: settings.log_json,
            ..Self::default()
        }
    }
}

impl TryFrom<&config::Config> for LoggingConfig {
    type Error = FailureToleranceError;

    /// Reads the `logging.*` keys, falling back to defaults for absent ones
    fn try_from(config: &config::Config) -> Result<Self> {
        let defaults = Self::default();
        let optional_bool = |key: &str, default: bool| -> Result<bool> {
            match config.get_bool(key) {
                Ok(value) => Ok(value),
                Err(config::ConfigError::NotFound(_)) => Ok(default),
                Err(err) => Err(err.into()),
            }
        };
        let optional_string = |key: &str| -> Result<Option<String>> {
            match config.get_string(key) {
                Ok(value) => Ok(Some(value)),
                Err(config::ConfigError::NotFound(_)) => Ok(None),
                Err(err) => Err(err.into()),
            }
        };

        Ok(Self {
            level: optional_string("logging.level")?.unwrap_or(defaults.level),
            service_name: optional_string("logging.service_name")?.unwrap_or(defaults.service_name),
            file_output: optional_bool("logging.file_output", defaults.file_output)?,
            log_dir: optional_string("logging.log_dir")?,
            json_format: optional_bool("logging.json_format", defaults.json_format)?,
            include_target: optional_bool("logging.include_target", defaults.include_target)?,
        })
    }
}

/// Initializes the global subscriber. Calling it again is a no-op.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FailureToleranceError::Logging(format!("Invalid log level '{}': {}", config.level, e)))?;

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(config.include_target)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(config.include_target));

    let file_layer = match (config.file_output, config.log_dir.as_deref()) {
        (true, Some(log_dir)) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (non_blocking, guard) = NonBlocking::new(appender);
            // The guard flushes on drop, so it has to live as long as the process
            Box::leak(Box::new(guard));
            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| FailureToleranceError::Logging(format!("Failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_source() {
        let source = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", true)
            .unwrap()
            .set_override("logging.log_dir", "/tmp/agent-logs")
            .unwrap()
            .build()
            .unwrap();

        let config = LoggingConfig::try_from(&source).unwrap();
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/agent-logs"));
        assert_eq!(config.service_name, "voice-agent");
        assert!(!config.file_output);
    }

    #[test]
    fn test_config_rejects_mistyped_values() {
        let source = config::Config::builder()
            .set_override("logging.json_format", "sometimes")
            .unwrap()
            .build()
            .unwrap();

        assert!(matches!(
            LoggingConfig::try_from(&source),
            Err(FailureToleranceError::Config(_))
        ));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        // Another test harness may already own the global subscriber
        if init_logging(Some(config.clone())).is_ok() {
            assert!(init_logging(Some(config)).is_ok());
        }
    }
}
