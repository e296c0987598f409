//! # Uncertainty Handling
//!
//! Partial results and timeouts that are neither clean successes nor clean
//! failures.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shared_types_rs::AgentSession;
use tracing::{error, info, warn};

use crate::types::{ErrorCategory, EscalationLevel, ExecutionResult, ServiceFailure};

/// Partial results kept for inspection
pub const PARTIAL_HISTORY_LIMIT: usize = 20;

/// Cumulative timeouts after which the caller hears a notice
pub const TIMEOUT_NOTICE_THRESHOLD: u32 = 3;

const TIMEOUT_NOTICE: &str = "I'm experiencing delays. Let me try a different approach.";

/// Output of an interrupted service call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialOutput {
    Text(String),
    Audio(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub operation: String,
    pub result: Option<PartialOutput>,
    pub error: String,
}

pub struct UncertaintyHandler {
    session: Arc<dyn AgentSession>,
    partial_results: VecDeque<PartialRecord>,
    timeout_count: u32,
}

impl fmt::Debug for UncertaintyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncertaintyHandler")
            .field("partial_results", &self.partial_results.len())
            .field("timeout_count", &self.timeout_count)
            .finish()
    }
}

impl UncertaintyHandler {
    pub fn new(session: Arc<dyn AgentSession>) -> Self {
        Self {
            session,
            partial_results: VecDeque::with_capacity(PARTIAL_HISTORY_LIMIT),
            timeout_count: 0,
        }
    }

    /// Stores the partial output and decides whether it can stand in for a
    /// complete one.
    pub fn handle_partial_failure(
        &mut self,
        partial: Option<PartialOutput>,
        error: &ServiceFailure,
        operation_name: &str,
    ) -> ExecutionResult<PartialOutput> {
        warn!(operation = %operation_name, error = %error, "Handling partial failure");

        if self.partial_results.len() == PARTIAL_HISTORY_LIMIT {
            self.partial_results.pop_front();
        }
        self.partial_results.push_back(PartialRecord {
            operation: operation_name.to_string(),
            result: partial.clone(),
            error: error.to_string(),
        });

        match partial {
            Some(output) if is_usable(&output, operation_name) => {
                info!(operation = %operation_name, "Partial result is usable");
                ExecutionResult::succeeded(output, 0, Duration::ZERO)
                    .escalate(EscalationLevel::GracefulDegradation)
            }
            _ => {
                warn!(operation = %operation_name, "Partial result is not usable");
                ExecutionResult::failed(error.clone(), ErrorCategory::Transient, 0, Duration::ZERO)
            }
        }
    }

    /// Counts the timeout and reports it as a failure. From the third
    /// timeout on, the caller is told the agent is changing approach.
    pub async fn handle_timeout<T>(&mut self, operation_name: &str, duration: Duration) -> ExecutionResult<T> {
        self.timeout_count += 1;
        warn!(
            operation = %operation_name,
            timeout_secs = duration.as_secs_f64(),
            total_timeouts = self.timeout_count,
            "Operation timed out"
        );

        if self.timeout_count >= TIMEOUT_NOTICE_THRESHOLD {
            if let Err(err) = self.session.say(TIMEOUT_NOTICE, true).await {
                error!(error = %err, "Failed to notify about timeout");
            }
        }

        ExecutionResult::failed(
            ServiceFailure::new(format!(
                "Operation {} timed out after {}s",
                operation_name,
                duration.as_secs_f64()
            )),
            ErrorCategory::Timeout,
            0,
            duration,
        )
    }

    pub fn reset(&mut self) {
        self.partial_results.clear();
        self.timeout_count = 0;
    }

    pub fn partial_results(&self) -> &VecDeque<PartialRecord> {
        &self.partial_results
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }
}

fn is_usable(output: &PartialOutput, operation_name: &str) -> bool {
    match (operation_name, output) {
        ("transcribe" | "generate", PartialOutput::Text(text)) => !text.trim().is_empty(),
        ("synthesize", _) => true,
        _ => false,
    }
}
