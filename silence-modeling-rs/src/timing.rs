//! # Cultural Timing
//!
//! Per-language turn-taking parameters: how long a pause may last before it
//! means something, how quickly the agent answers and how often it
//! acknowledges the speaker.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_types_rs::serde_secs;
use shared_types_rs::{AgentSettings, Language};

/// How readily the listener produces short acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackchannelFrequency {
    Low,
    Medium,
    High,
}

impl fmt::Display for BackchannelFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackchannelFrequency::Low => write!(f, "low"),
            BackchannelFrequency::Medium => write!(f, "medium"),
            BackchannelFrequency::High => write!(f, "high"),
        }
    }
}

/// Upper bounds of the silence buckets. A silence belongs to the first
/// bucket whose bound it is strictly below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceThresholds {
    #[serde(with = "serde_secs")]
    pub normal_pause: Duration,
    #[serde(with = "serde_secs")]
    pub thinking: Duration,
    #[serde(with = "serde_secs")]
    pub end_of_speech: Duration,
    /// Informational; anything past `end_of_speech` is disengagement
    #[serde(with = "serde_secs")]
    pub disengagement: Duration,
}

/// Voice pacing hints for the speech synthesizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsPacing {
    pub speed: f64,
    pub volume: f64,
    pub emotion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CulturalTimingRules {
    pub language: Language,
    #[serde(with = "serde_secs")]
    pub min_response_delay: Duration,
    #[serde(with = "serde_secs")]
    pub max_response_delay: Duration,
    #[serde(with = "serde_secs")]
    pub long_silence_threshold: Duration,
    pub backchannel_frequency: BackchannelFrequency,
    #[serde(with = "serde_secs")]
    pub backchannel_interval: Duration,
    pub allow_overlap: bool,
    #[serde(with = "serde_secs")]
    pub min_interruption_duration: Duration,
    pub thresholds: SilenceThresholds,
    pub tts: TtsPacing,
}

impl CulturalTimingRules {
    /// Slower turns, frequent acknowledgements, no talking over each other
    pub fn japanese() -> Self {
        Self {
            language: Language::Japanese,
            min_response_delay: Duration::from_millis(200),
            max_response_delay: Duration::from_millis(500),
            long_silence_threshold: Duration::from_secs(2),
            backchannel_frequency: BackchannelFrequency::High,
            backchannel_interval: Duration::from_secs(2),
            allow_overlap: false,
            min_interruption_duration: Duration::from_millis(800),
            thresholds: SilenceThresholds {
                normal_pause: Duration::from_millis(300),
                thinking: Duration::from_secs(1),
                end_of_speech: Duration::from_secs(2),
                disengagement: Duration::from_secs(5),
            },
            tts: TtsPacing {
                speed: 1.0,
                volume: 1.0,
                emotion: "calm".to_string(),
            },
        }
    }

    pub fn english() -> Self {
        Self {
            language: Language::English,
            min_response_delay: Duration::from_millis(50),
            max_response_delay: Duration::from_millis(150),
            long_silence_threshold: Duration::from_secs(1),
            backchannel_frequency: BackchannelFrequency::Low,
            backchannel_interval: Duration::from_secs(3),
            allow_overlap: true,
            min_interruption_duration: Duration::from_millis(300),
            thresholds: SilenceThresholds {
                normal_pause: Duration::from_millis(200),
                thinking: Duration::from_millis(500),
                end_of_speech: Duration::from_secs(1),
                disengagement: Duration::from_secs(3),
            },
            tts: TtsPacing {
                speed: 1.0,
                volume: 1.0,
                emotion: "friendly".to_string(),
            },
        }
    }

    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Japanese => Self::japanese(),
            Language::English => Self::english(),
        }
    }

    /// Any tag starting with `ja` selects the Japanese profile
    pub fn for_tag(tag: &str) -> Self {
        Self::for_language(Language::from_tag(tag))
    }
}

/// Turn-taking parameters handed to the conversation host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationalConfig {
    pub allow_interruptions: bool,
    pub discard_audio_if_uninterruptible: bool,
    #[serde(with = "serde_secs")]
    pub min_interruption_duration: Duration,
    pub min_interruption_words: u32,
    /// `None` disables false-interruption detection
    #[serde(with = "serde_secs::option")]
    pub false_interruption_timeout: Option<Duration>,
    pub resume_false_interruption: bool,
    #[serde(with = "serde_secs")]
    pub min_endpointing_delay: Duration,
    #[serde(with = "serde_secs")]
    pub max_endpointing_delay: Duration,
    #[serde(with = "serde_secs")]
    pub min_consecutive_speech_delay: Duration,
    #[serde(with = "serde_secs::option")]
    pub user_away_timeout: Option<Duration>,
    pub max_tool_steps: u32,
    pub preemptive_generation: bool,
    pub ivr_detection: bool,
}

impl ConversationalConfig {
    pub fn for_language(
        language: Language,
        preemptive_generation: bool,
        user_away_timeout: Option<Duration>,
    ) -> Self {
        match language {
            // Longer pauses are normal, so interruptions need more evidence
            Language::Japanese => Self {
                allow_interruptions: true,
                discard_audio_if_uninterruptible: true,
                min_interruption_duration: Duration::from_millis(800),
                min_interruption_words: 2,
                false_interruption_timeout: Some(Duration::from_millis(2500)),
                resume_false_interruption: true,
                min_endpointing_delay: Duration::from_millis(200),
                max_endpointing_delay: Duration::from_secs(4),
                min_consecutive_speech_delay: Duration::from_millis(100),
                user_away_timeout,
                max_tool_steps: 3,
                preemptive_generation,
                ivr_detection: false,
            },
            Language::English => Self {
                allow_interruptions: true,
                discard_audio_if_uninterruptible: true,
                min_interruption_duration: Duration::from_millis(300),
                min_interruption_words: 1,
                false_interruption_timeout: Some(Duration::from_secs(2)),
                resume_false_interruption: true,
                min_endpointing_delay: Duration::from_millis(50),
                max_endpointing_delay: Duration::from_secs(3),
                min_consecutive_speech_delay: Duration::ZERO,
                user_away_timeout,
                max_tool_steps: 3,
                preemptive_generation,
                ivr_detection: false,
            },
        }
    }

    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self::for_language(
            settings.language,
            settings.preemptive_generation,
            settings.user_away_timeout,
        )
    }
}
