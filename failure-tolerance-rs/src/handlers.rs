//! # Service Handlers
//!
//! Call sites for the speech, voice, language model and session services.
//! Each handler owns an executor tuned for its service and decides how an
//! exhausted call escalates.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared_types_rs::{AgentSession, Language, ReplyOptions, TtsSettings};
use tracing::{info, warn};

use crate::executor::{ExecuteOptions, FailureTolerantExecutor};
use crate::retry::RetryConfig;
use crate::types::service_names::{AGENT_SESSION, CARTESIA_TTS, DEEPGRAM_STT, ELEVENLABS_TTS, OPENAI_LLM};
use crate::types::{ErrorCategory, EscalationLevel, ExecutionResult, FailureContext, ServiceFailure};

/// Speech recognition provider
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &[u8], language: Language) -> Result<String, ServiceFailure>;
}

/// Voice synthesis provider
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, settings: &TtsSettings) -> Result<Vec<u8>, ServiceFailure>;
}

/// Language model provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceFailure>;
}

fn unavailable<T>(what: &str) -> ExecutionResult<T> {
    ExecutionResult::failed(
        ServiceFailure::new(format!("No {} service available", what)),
        ErrorCategory::ServiceUnavailable,
        0,
        Duration::ZERO,
    )
}

pub struct SttHandler {
    language: Language,
    primary: Option<Arc<dyn SpeechToText>>,
    executor: FailureTolerantExecutor,
}

impl SttHandler {
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(language: Language, primary: Option<Arc<dyn SpeechToText>>) -> Self {
        if primary.is_none() {
            warn!("No speech recognition provider configured");
        }
        Self {
            language,
            primary,
            executor: FailureTolerantExecutor::new(Some(RetryConfig::with_bounds(
                3,
                Duration::from_secs(1),
                Duration::from_secs(10),
            ))),
        }
    }

    pub fn executor(&self) -> &FailureTolerantExecutor {
        &self.executor
    }

    pub async fn transcribe(&self, audio: &[u8]) -> ExecutionResult<String> {
        let Some(primary) = self.primary.as_ref() else {
            return unavailable("STT");
        };
        let language = self.language;

        self.executor
            .execute(
                move || primary.transcribe(audio, language),
                DEEPGRAM_STT,
                "transcribe",
                ExecuteOptions::default().with_timeout(Self::TIMEOUT),
            )
            .await
    }
}

impl fmt::Debug for SttHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttHandler")
            .field("language", &self.language)
            .field("primary", &self.primary.is_some())
            .finish()
    }
}

pub struct TtsHandler {
    settings: TtsSettings,
    primary: Option<Arc<dyn TextToSpeech>>,
    fallback: Option<Arc<dyn TextToSpeech>>,
    executor: FailureTolerantExecutor,
}

impl TtsHandler {
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// A secondary voice with no primary is promoted to primary.
    pub fn new(
        settings: TtsSettings,
        primary: Option<Arc<dyn TextToSpeech>>,
        fallback: Option<Arc<dyn TextToSpeech>>,
    ) -> Self {
        let (primary, fallback) = match (primary, fallback) {
            (None, Some(secondary)) => {
                info!("Using secondary voice as primary");
                (Some(secondary), None)
            }
            pair => pair,
        };

        Self {
            settings,
            primary,
            fallback,
            executor: FailureTolerantExecutor::new(Some(RetryConfig::with_bounds(
                2,
                Duration::from_millis(500),
                Duration::from_secs(5),
            ))),
        }
    }

    /// Service name the primary voice is tracked under
    pub fn service_name(&self) -> &'static str {
        if self.fallback.is_some() {
            ELEVENLABS_TTS
        } else {
            CARTESIA_TTS
        }
    }

    pub fn executor(&self) -> &FailureTolerantExecutor {
        &self.executor
    }

    pub async fn synthesize(&self, text: &str) -> ExecutionResult<Vec<u8>> {
        let Some(primary) = self.primary.as_ref() else {
            return unavailable("TTS");
        };
        let settings = &self.settings;
        let has_fallback = self.fallback.is_some();

        let mut options = ExecuteOptions::default()
            .with_timeout(Self::TIMEOUT)
            .with_escalation_handler(move |context: &FailureContext| {
                // Switching voices beats another wait
                if has_fallback && context.attempt_number >= 1 {
                    EscalationLevel::FallbackService
                } else {
                    EscalationLevel::RetryWithBackoff
                }
            });
        if let Some(fallback) = self.fallback.clone() {
            options = options.with_fallback(move || async move {
                info!("Using fallback voice");
                fallback.synthesize(text, settings).await
            });
        }

        self.executor
            .execute(
                move || primary.synthesize(text, settings),
                self.service_name(),
                "synthesize",
                options,
            )
            .await
    }
}

impl fmt::Debug for TtsHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsHandler")
            .field("settings", &self.settings)
            .field("primary", &self.primary.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

pub struct LlmHandler {
    primary: Option<Arc<dyn LanguageModel>>,
    fallback: Option<Arc<dyn LanguageModel>>,
    executor: FailureTolerantExecutor,
}

impl LlmHandler {
    pub const TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(primary: Option<Arc<dyn LanguageModel>>, fallback: Option<Arc<dyn LanguageModel>>) -> Self {
        if primary.is_none() {
            warn!("No language model configured");
        }
        Self {
            primary,
            fallback,
            executor: FailureTolerantExecutor::new(Some(RetryConfig::with_bounds(
                3,
                Duration::from_secs(2),
                Duration::from_secs(30),
            ))),
        }
    }

    pub fn executor(&self) -> &FailureTolerantExecutor {
        &self.executor
    }

    pub async fn generate(&self, prompt: &str) -> ExecutionResult<String> {
        let Some(primary) = self.primary.as_ref() else {
            return unavailable("LLM");
        };
        let has_fallback = self.fallback.is_some();

        let mut options = ExecuteOptions::default()
            .with_timeout(Self::TIMEOUT)
            .with_escalation_handler(move |context: &FailureContext| match context.category {
                ErrorCategory::RateLimit => EscalationLevel::RetryWithBackoff,
                ErrorCategory::QuotaExceeded => EscalationLevel::HumanTransfer,
                // Judged on the retry budget, so a failure that stopped retries early still falls back
                _ if context.total_attempts >= 2 && has_fallback => EscalationLevel::FallbackService,
                _ => EscalationLevel::RetryWithBackoff,
            });
        if let Some(fallback) = self.fallback.clone() {
            options = options.with_fallback(move || async move {
                info!("Using fallback language model");
                fallback.generate(prompt).await
            });
        }

        self.executor
            .execute(move || primary.generate(prompt), OPENAI_LLM, "generate", options)
            .await
    }
}

impl fmt::Debug for LlmHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmHandler")
            .field("primary", &self.primary.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Session operations with retries
pub struct SessionHandler {
    session: Arc<dyn AgentSession>,
    executor: FailureTolerantExecutor,
}

impl SessionHandler {
    pub const REPLY_TIMEOUT: Duration = Duration::from_secs(45);
    pub const SAY_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(session: Arc<dyn AgentSession>) -> Self {
        Self {
            session,
            executor: FailureTolerantExecutor::new(Some(RetryConfig::with_bounds(
                2,
                Duration::from_secs(1),
                Duration::from_secs(5),
            ))),
        }
    }

    pub fn executor(&self) -> &FailureTolerantExecutor {
        &self.executor
    }

    pub async fn generate_reply(&self, instructions: &str, options: ReplyOptions) -> ExecutionResult<String> {
        let session = &self.session;
        let execute_options = ExecuteOptions::default()
            .with_timeout(Self::REPLY_TIMEOUT)
            .with_escalation_handler(|context: &FailureContext| match context.category {
                ErrorCategory::Timeout | ErrorCategory::Network => EscalationLevel::GracefulDegradation,
                _ => EscalationLevel::Retry,
            });

        self.executor
            .execute(
                move || session.generate_reply(instructions, options.clone()),
                AGENT_SESSION,
                "generate_reply",
                execute_options,
            )
            .await
    }

    pub async fn say(&self, text: &str, allow_interruptions: bool) -> ExecutionResult<()> {
        let session = &self.session;
        self.executor
            .execute(
                move || session.say(text, allow_interruptions),
                AGENT_SESSION,
                "say",
                ExecuteOptions::default().with_timeout(Self::SAY_TIMEOUT),
            )
            .await
    }
}

impl fmt::Debug for SessionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandler").finish_non_exhaustive()
    }
}
