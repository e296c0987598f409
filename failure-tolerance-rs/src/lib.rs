//! # Failure Tolerance
//!
//! Keeps a voice conversation alive when the speech, voice and language
//! model services behind it misbehave.
//!
//! ## Features
//!
//! - Error classification from provider messages and status codes
//! - Retry policy with exponential backoff and jitter
//! - Per-service circuit breakers
//! - Failure-tolerant execution with timeouts, fallbacks and escalation
//! - Session-wide degradation ladder and transfer to a human agent
//! - Handling of partial results and repeated timeouts
//! - Per-service call handlers for STT, TTS, LLM and session operations
//! - Structured logging setup
//!

pub mod types;
pub mod classifier;
pub mod retry;
pub mod circuit_breaker;
pub mod executor;
pub mod escalation;
pub mod uncertainty;
pub mod handlers;
pub mod logging;

// Re-export commonly used types
pub use types::{
    ErrorCategory, EscalationLevel, ExecutionResult, FailureContext, FailureToleranceError, Result,
    ServiceFailure,
};
pub use classifier::ErrorClassifier;
pub use retry::{RetryConfig, RetryPolicy};
pub use circuit_breaker::{Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use executor::{failure_tolerant, ExecuteOptions, FailureTolerant, FailureTolerantExecutor};
pub use escalation::{Capabilities, DegradationMode, EscalationManager, EscalationPolicy};
pub use uncertainty::{PartialOutput, UncertaintyHandler};
pub use handlers::{LanguageModel, LlmHandler, SessionHandler, SpeechToText, SttHandler, TextToSpeech, TtsHandler};
pub use logging::{init_logging, LoggingConfig};

/// Initializes logging from a `config` source with a `logging` table
pub fn init_with_config(config: &config::Config) -> Result<()> {
    init_logging(Some(LoggingConfig::try_from(config)?))
}
