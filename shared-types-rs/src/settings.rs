// shared-types-rs/src/settings.rs
// Agent settings loader: defaults, optional config file, then environment

use crate::language::Language;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Base name of the optional settings file (`voice-agent.toml`, `.yaml`, ...).
pub const SETTINGS_FILE: &str = "voice-agent";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Voice pacing handed to the TTS provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsSettings {
    pub speed: f64,
    pub volume: f64,
    pub emotion: String,
}

/// Settings the agent binary is started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub language: Language,
    /// The tag exactly as configured, e.g. `ja` or `en-GB`.
    pub language_tag: String,
    pub tts: TtsSettings,
    pub preemptive_generation: bool,
    #[serde(with = "crate::serde_secs::option")]
    pub user_away_timeout: Option<Duration>,
    pub log_level: String,
    pub log_json: bool,
}

// Flat mirror of the environment variable names.
#[derive(Debug, Deserialize)]
struct RawSettings {
    agent_language: String,
    tts_speed: f64,
    tts_volume: f64,
    tts_emotion: Option<String>,
    preemptive_generation: bool,
    user_away_timeout: Option<f64>,
    log_level: String,
    log_json: bool,
}

impl AgentSettings {
    /// Loads `.env.local` and `.env`, then layers defaults, the optional
    /// settings file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name(SETTINGS_FILE).required(false))
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        Self::from_config(config)
    }

    /// Defaults overlaid with a single settings file. The environment is ignored.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::builder()?
            .add_source(File::from(path.as_ref()))
            .build()?;

        Self::from_config(config)
    }

    /// Builder preloaded with every default, for callers adding their own sources.
    pub fn builder() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("agent_language", Language::English.tag())?
            .set_default("tts_speed", 1.0)?
            .set_default("tts_volume", 1.0)?
            .set_default("preemptive_generation", false)?
            .set_default("log_level", "info")?
            .set_default("log_json", false)?)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = config.try_deserialize()?;

        if !(raw.tts_speed.is_finite() && raw.tts_speed > 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "tts_speed must be positive, got {}",
                raw.tts_speed
            )));
        }
        if !(raw.tts_volume.is_finite() && raw.tts_volume >= 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "tts_volume must not be negative, got {}",
                raw.tts_volume
            )));
        }

        let user_away_timeout = match raw.user_away_timeout {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) => {
                return Err(ConfigError::InvalidValue(format!(
                    "user_away_timeout must be positive, got {}",
                    secs
                )))
            }
            None => None,
        };

        let language = Language::from_tag(&raw.agent_language);
        let emotion = raw.tts_emotion.unwrap_or_else(|| {
            if language.is_japanese() {
                "calm".to_string()
            } else {
                "friendly".to_string()
            }
        });

        Ok(Self {
            language,
            language_tag: raw.agent_language,
            tts: TtsSettings {
                speed: raw.tts_speed,
                volume: raw.tts_volume,
                emotion,
            },
            preemptive_generation: raw.preemptive_generation,
            user_away_timeout,
            log_level: raw.log_level,
            log_json: raw.log_json,
        })
    }
}
