//! # Escalation Management
//!
//! Tracks failures across a whole session, walks the degradation ladder and
//! decides when a caller should be handed to a human agent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use shared_types_rs::AgentSession;
use tracing::{error, info, warn};

use crate::types::service_names::{CARTESIA_TTS, DEEPGRAM_STT, ELEVENLABS_TTS, OPENAI_LLM};
use crate::types::{EscalationLevel, ExecutionResult, FailureContext};

/// Services whose repeated failure makes the call unworkable
pub const CRITICAL_SERVICES: [&str; 2] = [OPENAI_LLM, DEEPGRAM_STT];

/// Failures of a single critical service that trigger a transfer
pub const CRITICAL_FAILURE_LIMIT: u32 = 3;

const TRANSFER_NOTICE: &str = "I'm experiencing technical difficulties and would like to transfer you \
to a human agent who can better assist you. Please hold for just a moment.";

const FAREWELL_NOTICE: &str = "I apologize, but I'm unable to continue this call due to technical issues. \
Please call back or contact support. Goodbye.";

/// Levels of reduced service, from full to minimal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    #[serde(rename = "full")]
    FullFunctionality,
    /// Fallback voice
    ReducedTts,
    /// Simpler model
    ReducedLlm,
    /// Slower or less accurate recognition
    ReducedStt,
    TextOnly,
    /// Prepare for transfer
    Minimal,
}

impl DegradationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationMode::FullFunctionality => "full",
            DegradationMode::ReducedTts => "reduced_tts",
            DegradationMode::ReducedLlm => "reduced_llm",
            DegradationMode::ReducedStt => "reduced_stt",
            DegradationMode::TextOnly => "text_only",
            DegradationMode::Minimal => "minimal",
        }
    }

    /// What the caller is told on entering this mode
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            DegradationMode::FullFunctionality => None,
            DegradationMode::ReducedTts => Some(
                "I'm experiencing some technical difficulties with my voice. I'll continue to assist you.",
            ),
            DegradationMode::ReducedLlm => {
                Some("I'm operating with reduced capabilities. I'll do my best to help you.")
            }
            DegradationMode::ReducedStt => Some(
                "I may have difficulty understanding you clearly. Please speak slowly and clearly.",
            ),
            DegradationMode::TextOnly => {
                Some("I'm switching to text-only mode due to technical issues.")
            }
            DegradationMode::Minimal => Some(
                "I'm experiencing significant technical difficulties. Let me transfer you to a human agent.",
            ),
        }
    }
}

impl fmt::Display for DegradationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy for handling escalations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Attempts a call site should spend before reporting a failure here
    pub max_retries_before_escalation: u32,
    pub enable_graceful_degradation: bool,
    pub enable_human_transfer: bool,
    /// Total failures before a transfer
    pub human_transfer_threshold: u32,
    /// Modes that may be entered. Modes left out are never used.
    pub degradation_sequence: Vec<DegradationMode>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_retries_before_escalation: 3,
            enable_graceful_degradation: true,
            enable_human_transfer: true,
            human_transfer_threshold: 5,
            degradation_sequence: vec![
                DegradationMode::FullFunctionality,
                DegradationMode::ReducedTts,
                DegradationMode::ReducedLlm,
                DegradationMode::ReducedStt,
                DegradationMode::TextOnly,
                DegradationMode::Minimal,
            ],
        }
    }
}

/// What the agent can still do in the current mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub stt: bool,
    pub tts: bool,
    pub llm: bool,
    pub full_voice: bool,
}

impl Capabilities {
    fn all() -> Self {
        Self {
            stt: true,
            tts: true,
            llm: true,
            full_voice: true,
        }
    }
}

/// Session-scoped escalation state
pub struct EscalationManager {
    session: Arc<dyn AgentSession>,
    policy: EscalationPolicy,
    current_mode: DegradationMode,
    failure_count: u32,
    service_failures: HashMap<String, u32>,
}

impl fmt::Debug for EscalationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EscalationManager")
            .field("policy", &self.policy)
            .field("current_mode", &self.current_mode)
            .field("failure_count", &self.failure_count)
            .field("service_failures", &self.service_failures)
            .finish()
    }
}

impl EscalationManager {
    pub fn new(session: Arc<dyn AgentSession>, policy: Option<EscalationPolicy>) -> Self {
        Self {
            session,
            policy: policy.unwrap_or_default(),
            current_mode: DegradationMode::FullFunctionality,
            failure_count: 0,
            service_failures: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub fn current_mode(&self) -> DegradationMode {
        self.current_mode
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn service_failures(&self, service_name: &str) -> u32 {
        self.service_failures.get(service_name).copied().unwrap_or(0)
    }

    /// Records a failure and returns how the caller should proceed.
    ///
    /// Entering a new degradation mode speaks its notice before returning.
    pub async fn record_failure(&mut self, service_name: &str, context: &FailureContext) -> EscalationLevel {
        self.failure_count += 1;
        let service_failures = {
            let count = self.service_failures.entry(service_name.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        warn!(
            service = %service_name,
            total_failures = self.failure_count,
            service_failures = service_failures,
            category = %context.category,
            failure_id = %context.id,
            "Recorded failure"
        );

        if self.should_escalate_to_human() {
            return EscalationLevel::HumanTransfer;
        }

        if self.policy.enable_graceful_degradation {
            let target = self.determine_degradation_mode();
            if target != self.current_mode && self.allows(target) {
                self.transition_to_mode(target).await;
                return EscalationLevel::GracefulDegradation;
            }
        }

        EscalationLevel::RetryWithBackoff
    }

    pub fn should_escalate_to_human(&self) -> bool {
        if !self.policy.enable_human_transfer {
            return false;
        }

        if self.failure_count >= self.policy.human_transfer_threshold {
            return true;
        }

        CRITICAL_SERVICES
            .iter()
            .any(|service| self.service_failures(service) >= CRITICAL_FAILURE_LIMIT)
    }

    fn determine_degradation_mode(&self) -> DegradationMode {
        let stt_failures = self.service_failures(DEEPGRAM_STT);
        let tts_failures = self.service_failures(ELEVENLABS_TTS) + self.service_failures(CARTESIA_TTS);
        let llm_failures = self.service_failures(OPENAI_LLM);

        if llm_failures >= 2 {
            DegradationMode::ReducedLlm
        } else if tts_failures >= 2 {
            DegradationMode::ReducedTts
        } else if stt_failures >= 2 {
            DegradationMode::ReducedStt
        } else if self.failure_count >= 6 {
            DegradationMode::Minimal
        } else if self.failure_count >= 4 {
            DegradationMode::TextOnly
        } else {
            self.current_mode
        }
    }

    fn allows(&self, mode: DegradationMode) -> bool {
        self.policy.degradation_sequence.contains(&mode)
    }

    async fn transition_to_mode(&mut self, new_mode: DegradationMode) {
        info!(from = %self.current_mode, to = %new_mode, "Transitioning degradation mode");
        self.current_mode = new_mode;
        counter!("escalation.degradations", 1, "mode" => new_mode.as_str());

        if let Some(message) = new_mode.notice() {
            if let Err(err) = self.session.say(message, false).await {
                error!(mode = %new_mode, error = %err, "Failed to notify user about degradation");
            }
        }
    }

    /// Acts on a finished call. Returns true when the outcome was handled
    /// (success, transfer or degradation) and the conversation can go on.
    pub async fn handle_escalation<T>(
        &mut self,
        result: &ExecutionResult<T>,
        service_name: &str,
        context: &FailureContext,
    ) -> bool {
        if result.success {
            return true;
        }

        match self.record_failure(service_name, context).await {
            EscalationLevel::HumanTransfer => {
                self.transfer_to_human(context).await;
                true
            }
            EscalationLevel::GracefulDegradation => true,
            _ => false,
        }
    }

    /// Tells the caller they are being transferred. If that fails, one last
    /// goodbye is attempted and its failure ignored.
    pub async fn transfer_to_human(&self, context: &FailureContext) {
        info!(
            service = %context.service_name,
            failure_id = %context.id,
            "Initiating transfer to human agent"
        );
        counter!("escalation.human_transfers", 1);

        match self.session.say(TRANSFER_NOTICE, false).await {
            Ok(()) => info!("Transfer to human agent initiated"),
            Err(err) => {
                error!(error = %err, "Failed to transfer to human agent");
                if let Err(err) = self.session.say(FAREWELL_NOTICE, false).await {
                    error!(error = %err, "Failed to deliver farewell message");
                }
            }
        }
    }

    pub fn get_current_capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::all();
        match self.current_mode {
            DegradationMode::FullFunctionality => {}
            DegradationMode::Minimal => {
                capabilities = Capabilities {
                    stt: false,
                    tts: false,
                    llm: false,
                    full_voice: false,
                }
            }
            DegradationMode::TextOnly => capabilities.full_voice = false,
            DegradationMode::ReducedStt => capabilities.stt = false,
            DegradationMode::ReducedTts => capabilities.tts = false,
            DegradationMode::ReducedLlm => capabilities.llm = false,
        }
        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, ServiceFailure};
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::eq;
    use shared_types_rs::testing::RecordingSession;
    use shared_types_rs::{ReplyOptions, SessionError, SessionEvent};
    use std::time::Duration;
    use tokio::sync::broadcast;

    mock! {
        pub Session {}

        #[async_trait]
        impl AgentSession for Session {
            async fn say(&self, text: &str, allow_interruptions: bool) -> Result<(), SessionError>;
            async fn generate_reply(&self, instructions: &str, options: ReplyOptions) -> Result<String, SessionError>;
            fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
        }
    }

    fn context(service: &str) -> FailureContext {
        FailureContext::new(ServiceFailure::new("boom"), ErrorCategory::Transient, service, "op")
    }

    fn manager_with(session: Arc<RecordingSession>, policy: EscalationPolicy) -> EscalationManager {
        EscalationManager::new(session, Some(policy))
    }

    #[tokio::test]
    async fn test_cumulative_failures_walk_to_minimal() {
        let session = Arc::new(RecordingSession::new());
        let policy = EscalationPolicy {
            human_transfer_threshold: 10,
            ..EscalationPolicy::default()
        };
        let mut manager = manager_with(session.clone(), policy);

        let mut levels = Vec::new();
        for _ in 0..6 {
            levels.push(manager.record_failure("weather_api", &context("weather_api")).await);
        }

        assert_eq!(
            levels,
            vec![
                EscalationLevel::RetryWithBackoff,
                EscalationLevel::RetryWithBackoff,
                EscalationLevel::RetryWithBackoff,
                EscalationLevel::GracefulDegradation,
                EscalationLevel::RetryWithBackoff,
                EscalationLevel::GracefulDegradation,
            ]
        );
        assert_eq!(manager.current_mode(), DegradationMode::Minimal);
        assert_eq!(
            session.spoken_texts(),
            vec![
                DegradationMode::TextOnly.notice().unwrap().to_string(),
                DegradationMode::Minimal.notice().unwrap().to_string(),
            ]
        );
        assert!(session.spoken().iter().all(|u| !u.allow_interruptions));
    }

    #[tokio::test]
    async fn test_critical_service_third_failure_transfers() {
        let session = Arc::new(RecordingSession::new());
        let policy = EscalationPolicy {
            human_transfer_threshold: 100,
            ..EscalationPolicy::default()
        };
        let mut manager = manager_with(session, policy);

        assert_eq!(
            manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await,
            EscalationLevel::RetryWithBackoff
        );
        assert_eq!(
            manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await,
            EscalationLevel::GracefulDegradation
        );
        assert_eq!(manager.current_mode(), DegradationMode::ReducedLlm);
        assert_eq!(
            manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await,
            EscalationLevel::HumanTransfer
        );
    }

    #[tokio::test]
    async fn test_total_threshold_transfers() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = manager_with(session, EscalationPolicy::default());

        for _ in 0..4 {
            manager.record_failure("weather_api", &context("weather_api")).await;
        }
        assert_eq!(
            manager.record_failure("weather_api", &context("weather_api")).await,
            EscalationLevel::HumanTransfer
        );
    }

    #[tokio::test]
    async fn test_tts_failures_are_pooled() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = manager_with(session, EscalationPolicy::default());

        manager.record_failure(ELEVENLABS_TTS, &context(ELEVENLABS_TTS)).await;
        let level = manager.record_failure(CARTESIA_TTS, &context(CARTESIA_TTS)).await;

        assert_eq!(level, EscalationLevel::GracefulDegradation);
        assert_eq!(manager.current_mode(), DegradationMode::ReducedTts);
        let capabilities = manager.get_current_capabilities();
        assert!(!capabilities.tts);
        assert!(capabilities.stt && capabilities.llm && capabilities.full_voice);
    }

    #[tokio::test]
    async fn test_service_failure_overrides_cumulative_mode() {
        let session = Arc::new(RecordingSession::new());
        let policy = EscalationPolicy {
            human_transfer_threshold: 100,
            ..EscalationPolicy::default()
        };
        let mut manager = manager_with(session.clone(), policy);

        for _ in 0..4 {
            manager.record_failure("weather_api", &context("weather_api")).await;
        }
        assert_eq!(manager.current_mode(), DegradationMode::TextOnly);

        manager.record_failure(ELEVENLABS_TTS, &context(ELEVENLABS_TTS)).await;
        let level = manager.record_failure(ELEVENLABS_TTS, &context(ELEVENLABS_TTS)).await;
        assert_eq!(level, EscalationLevel::GracefulDegradation);
        assert_eq!(manager.current_mode(), DegradationMode::ReducedTts);
        assert!(!manager.get_current_capabilities().tts);

        manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await;
        let level = manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await;
        assert_eq!(level, EscalationLevel::GracefulDegradation);
        assert_eq!(manager.current_mode(), DegradationMode::ReducedLlm);
        assert!(!manager.get_current_capabilities().llm);

        assert_eq!(
            session.spoken_texts().last().map(String::as_str),
            DegradationMode::ReducedLlm.notice()
        );
    }

    #[tokio::test]
    async fn test_modes_outside_sequence_are_skipped() {
        let session = Arc::new(RecordingSession::new());
        let policy = EscalationPolicy {
            human_transfer_threshold: 100,
            degradation_sequence: vec![DegradationMode::FullFunctionality, DegradationMode::Minimal],
            ..EscalationPolicy::default()
        };
        let mut manager = manager_with(session.clone(), policy);

        for _ in 0..2 {
            assert_eq!(
                manager.record_failure(DEEPGRAM_STT, &context(DEEPGRAM_STT)).await,
                EscalationLevel::RetryWithBackoff
            );
        }
        assert_eq!(manager.current_mode(), DegradationMode::FullFunctionality);
        assert!(session.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_degradation_disabled() {
        let session = Arc::new(RecordingSession::new());
        let policy = EscalationPolicy {
            enable_graceful_degradation: false,
            enable_human_transfer: false,
            ..EscalationPolicy::default()
        };
        let mut manager = manager_with(session.clone(), policy);

        for _ in 0..8 {
            assert_eq!(
                manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await,
                EscalationLevel::RetryWithBackoff
            );
        }
        assert_eq!(manager.current_mode(), DegradationMode::FullFunctionality);
        assert!(session.spoken().is_empty());
    }

    #[test]
    fn test_human_transfer_disabled() {
        let session = Arc::new(RecordingSession::new());
        let policy = EscalationPolicy {
            enable_human_transfer: false,
            ..EscalationPolicy::default()
        };
        let mut manager = manager_with(session, policy);

        for _ in 0..3 {
            tokio_test::block_on(manager.record_failure(DEEPGRAM_STT, &context(DEEPGRAM_STT)));
        }
        assert_eq!(manager.service_failures(DEEPGRAM_STT), 3);
        assert!(!manager.should_escalate_to_human());
        assert_eq!(manager.current_mode(), DegradationMode::ReducedStt);
    }

    #[test]
    fn test_capabilities_by_mode() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = manager_with(session, EscalationPolicy::default());

        manager.current_mode = DegradationMode::Minimal;
        let caps = manager.get_current_capabilities();
        assert!(!caps.stt && !caps.tts && !caps.llm && !caps.full_voice);

        manager.current_mode = DegradationMode::TextOnly;
        let caps = manager.get_current_capabilities();
        assert!(caps.stt && caps.tts && caps.llm && !caps.full_voice);

        manager.current_mode = DegradationMode::ReducedStt;
        assert!(!manager.get_current_capabilities().stt);
    }

    #[tokio::test]
    async fn test_degradation_notice_failure_is_logged_not_raised() {
        let session = Arc::new(RecordingSession::new());
        session.fail_next_say(SessionError::Closed);
        let mut manager = manager_with(session.clone(), EscalationPolicy::default());

        manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await;
        let level = manager.record_failure(OPENAI_LLM, &context(OPENAI_LLM)).await;

        assert_eq!(level, EscalationLevel::GracefulDegradation);
        assert!(session.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_handle_escalation_transfers_with_farewell_fallback() {
        let mut session = MockSession::new();
        let mut seq = mockall::Sequence::new();
        session
            .expect_say()
            .with(eq(TRANSFER_NOTICE), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(SessionError::Speech("tts offline".to_string())));
        session
            .expect_say()
            .with(eq(FAREWELL_NOTICE), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(SessionError::Closed));

        let policy = EscalationPolicy {
            human_transfer_threshold: 1,
            enable_graceful_degradation: false,
            ..EscalationPolicy::default()
        };
        let mut manager = EscalationManager::new(Arc::new(session), Some(policy));

        let ctx = context("weather_api");
        let result: ExecutionResult<()> = ExecutionResult::failed(
            ctx.error.clone(),
            ErrorCategory::Transient,
            3,
            Duration::from_secs(1),
        );
        assert!(manager.handle_escalation(&result, "weather_api", &ctx).await);
    }

    #[tokio::test]
    async fn test_handle_escalation_reports_unhandled() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = manager_with(session, EscalationPolicy::default());
        let ctx = context("weather_api");

        let ok = ExecutionResult::succeeded((), 1, Duration::ZERO);
        assert!(manager.handle_escalation(&ok, "weather_api", &ctx).await);
        assert_eq!(manager.failure_count(), 0);

        let failed: ExecutionResult<()> =
            ExecutionResult::failed(ctx.error.clone(), ErrorCategory::Transient, 1, Duration::ZERO);
        assert!(!manager.handle_escalation(&failed, "weather_api", &ctx).await);
        assert_eq!(manager.failure_count(), 1);
    }
}
