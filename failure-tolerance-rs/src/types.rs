//! # Failure Types
//!
//! Categories, escalation levels and the result/context records passed
//! between the executor, the escalation manager and call sites.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to the crate error
pub type Result<T, E = FailureToleranceError> = std::result::Result<T, E>;

/// Errors raised by the framework itself, never by a wrapped operation
#[derive(Debug, thiserror::Error)]
pub enum FailureToleranceError {
    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Names of the services the agent calls, used as circuit breaker keys
pub mod service_names {
    pub const DEEPGRAM_STT: &str = "deepgram_stt";
    pub const ELEVENLABS_TTS: &str = "elevenlabs_tts";
    pub const CARTESIA_TTS: &str = "cartesia_tts";
    pub const OPENAI_LLM: &str = "openai_llm";
    pub const AGENT_SESSION: &str = "agent_session";
}

/// What kind of failure a service call ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Temporary error, worth retrying
    Transient,
    /// Will not succeed on retry
    Permanent,
    RateLimit,
    Timeout,
    Network,
    Authentication,
    QuotaExceeded,
    ServiceUnavailable,
    InvalidInput,
}

impl ErrorCategory {
    /// Categories retried by a default [`crate::retry::RetryConfig`]
    pub const DEFAULT_RETRYABLE: [ErrorCategory; 5] = [
        ErrorCategory::Transient,
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::ServiceUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::QuotaExceeded => "quota_exceeded",
            ErrorCategory::ServiceUnavailable => "service_unavailable",
            ErrorCategory::InvalidInput => "invalid_input",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a caller should proceed once local recovery is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Retry,
    RetryWithBackoff,
    FallbackService,
    GracefulDegradation,
    HumanTransfer,
    Abort,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationLevel::Retry => "retry",
            EscalationLevel::RetryWithBackoff => "retry_with_backoff",
            EscalationLevel::FallbackService => "fallback_service",
            EscalationLevel::GracefulDegradation => "graceful_degradation",
            EscalationLevel::HumanTransfer => "human_transfer",
            EscalationLevel::Abort => "abort",
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error carried by a failed [`ExecutionResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ServiceFailure {
    pub message: String,
    /// The service the failure was observed on, when known
    pub service: Option<String>,
}

impl ServiceFailure {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            service: None,
        }
    }

    /// Captures any displayable error as a failure record
    pub fn from_error<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self::new(error.to_string())
    }

    pub fn with_service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// Everything known about a failed call once retries are exhausted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    /// Correlates log lines and escalation records for one failure
    pub id: Uuid,
    pub error: ServiceFailure,
    pub category: ErrorCategory,
    /// Attempts actually performed
    pub attempt_number: u32,
    /// Attempts the retry policy allowed
    pub total_attempts: u32,
    #[serde(with = "shared_types_rs::serde_secs")]
    pub elapsed_time: Duration,
    pub service_name: String,
    pub operation_name: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl FailureContext {
    pub fn new<S, O>(error: ServiceFailure, category: ErrorCategory, service_name: S, operation_name: O) -> Self
    where
        S: Into<String>,
        O: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            error,
            category,
            attempt_number: 0,
            total_attempts: 0,
            elapsed_time: Duration::ZERO,
            service_name: service_name.into(),
            operation_name: operation_name.into(),
            occurred_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn attempts(mut self, attempt_number: u32, total_attempts: u32) -> Self {
        self.attempt_number = attempt_number;
        self.total_attempts = total_attempts;
        self
    }

    pub fn elapsed(mut self, elapsed_time: Duration) -> Self {
        self.elapsed_time = elapsed_time;
        self
    }

    /// Adds a metadata entry, skipping values that fail to serialize
    pub fn metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
        self
    }
}

/// Outcome of a failure-tolerant call. Failures are values, not errors;
/// use [`ExecutionResult::into_result`] to turn one into a `Result`.
#[derive(Debug, Clone)]
pub struct ExecutionResult<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<ServiceFailure>,
    pub category: Option<ErrorCategory>,
    pub attempts: u32,
    pub elapsed_time: Duration,
    pub escalated: bool,
    pub escalation_level: Option<EscalationLevel>,
    /// Present when the call exhausted its retries
    pub context: Option<FailureContext>,
}

impl<T> ExecutionResult<T> {
    pub fn succeeded(value: T, attempts: u32, elapsed_time: Duration) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            category: None,
            attempts,
            elapsed_time,
            escalated: false,
            escalation_level: None,
            context: None,
        }
    }

    pub fn failed(error: ServiceFailure, category: ErrorCategory, attempts: u32, elapsed_time: Duration) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error),
            category: Some(category),
            attempts,
            elapsed_time,
            escalated: false,
            escalation_level: None,
            context: None,
        }
    }

    /// Marks the result as escalated at the given level
    pub fn escalate(mut self, level: EscalationLevel) -> Self {
        self.escalated = true;
        self.escalation_level = Some(level);
        self
    }

    pub fn with_context(mut self, context: FailureContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn map<U, F>(self, f: F) -> ExecutionResult<U>
    where
        F: FnOnce(T) -> U,
    {
        ExecutionResult {
            success: self.success,
            value: self.value.map(f),
            error: self.error,
            category: self.category,
            attempts: self.attempts,
            elapsed_time: self.elapsed_time,
            escalated: self.escalated,
            escalation_level: self.escalation_level,
            context: self.context,
        }
    }

    /// Converts into a standard Result, yielding the value on success
    pub fn into_result(self) -> std::result::Result<T, ServiceFailure> {
        match (self.success, self.value) {
            (true, Some(value)) => Ok(value),
            (_, _) => Err(self
                .error
                .unwrap_or_else(|| ServiceFailure::new("operation finished without a value"))),
        }
    }
}
