//! # Circuit Breaker Registry
//!
//! Per-service circuit breakers owned by one executor. A service's breaker is
//! created on first use and lives as long as the registry.
//!
//! - `Closed`: calls flow; consecutive failures are counted
//! - `Open`: calls are rejected until the cooldown since the last failure passes
//! - `HalfOpen`: a single trial call decides between `Closed` and `Open`

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked
    Open,
    /// Testing recovery with one trial request
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Configuration shared by every breaker in a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is let through
    #[serde(with = "shared_types_rs::serde_secs")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Answer to a request for permission to call a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The caller holds the single half-open trial and must settle it
    Trial,
    Rejected,
}

/// Point-in-time view of one service's breaker
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub success_count: u64,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct CircuitStats {
    state: CircuitState,
    success_count: u64,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            success_count: 0,
            failure_count: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }
}

/// Circuit breakers keyed by service name
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, CircuitStats>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: Option<CircuitBreakerConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, CircuitStats>> {
        // No invariant spans a panic inside these short sections
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks whether a call to `service_name` may proceed.
    ///
    /// An open circuit whose cooldown has passed moves to `HalfOpen` and
    /// grants exactly one trial; further calls are rejected until that trial
    /// is recorded or released.
    pub fn admit(&self, service_name: &str) -> Admission {
        let mut circuits = self.circuits();
        let Some(stats) = circuits.get_mut(service_name) else {
            return Admission::Allowed;
        };

        match stats.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled_down = stats
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.cooldown);
                if cooled_down {
                    stats.state = CircuitState::HalfOpen;
                    stats.trial_in_flight = true;
                    info!(circuit = %service_name, "Circuit HALF-OPEN: allowing trial request");
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if stats.trial_in_flight {
                    debug!(circuit = %service_name, "Trial already in flight, rejecting request");
                    Admission::Rejected
                } else {
                    stats.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    /// [`admit`](Self::admit) for callers that do not track trials
    pub fn is_allowed(&self, service_name: &str) -> bool {
        self.admit(service_name) != Admission::Rejected
    }

    /// Hands back a trial that ended without a result, such as a cancelled
    /// call. The circuit stays half-open and the next call becomes the trial.
    pub fn release_trial(&self, service_name: &str) {
        let mut circuits = self.circuits();
        if let Some(stats) = circuits.get_mut(service_name) {
            if stats.state == CircuitState::HalfOpen && stats.trial_in_flight {
                stats.trial_in_flight = false;
                info!(circuit = %service_name, "Trial request abandoned, circuit stays HALF-OPEN");
            }
        }
    }

    pub fn record_success(&self, service_name: &str) {
        let mut circuits = self.circuits();
        let stats = circuits
            .entry(service_name.to_string())
            .or_insert_with(CircuitStats::new);

        stats.success_count += 1;
        stats.trial_in_flight = false;

        match stats.state {
            CircuitState::HalfOpen => {
                stats.state = CircuitState::Closed;
                stats.failure_count = 0;
                info!(circuit = %service_name, "Circuit CLOSED: Service recovered");
            }
            CircuitState::Closed => {
                // Only consecutive failures count towards opening
                stats.failure_count = 0;
            }
            CircuitState::Open => {
                warn!(circuit = %service_name, "Received success in OPEN state, ignoring");
            }
        }
    }

    pub fn record_failure(&self, service_name: &str) {
        let mut circuits = self.circuits();
        let stats = circuits
            .entry(service_name.to_string())
            .or_insert_with(CircuitStats::new);

        stats.failure_count = stats.failure_count.saturating_add(1);
        stats.last_failure = Some(Instant::now());
        stats.trial_in_flight = false;

        match stats.state {
            CircuitState::HalfOpen => {
                stats.state = CircuitState::Open;
                warn!(circuit = %service_name, "Circuit OPEN: trial request failed");
                counter!("circuit_breaker.opened", 1, "service" => service_name.to_string());
            }
            CircuitState::Closed if stats.failure_count >= self.config.failure_threshold => {
                stats.state = CircuitState::Open;
                warn!(
                    circuit = %service_name,
                    failures = stats.failure_count,
                    "Circuit OPEN: failure threshold reached"
                );
                counter!("circuit_breaker.opened", 1, "service" => service_name.to_string());
            }
            _ => {}
        }
    }

    /// Current state without triggering any transition
    pub fn state(&self, service_name: &str) -> CircuitState {
        self.circuits()
            .get(service_name)
            .map_or(CircuitState::Closed, |stats| stats.state)
    }

    pub fn snapshot(&self, service_name: &str) -> Option<BreakerSnapshot> {
        self.circuits().get(service_name).map(|stats| BreakerSnapshot {
            state: stats.state,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            last_failure: stats.last_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_service_is_closed() {
        let registry = CircuitBreakerRegistry::default();
        assert!(registry.is_allowed("deepgram_stt"));
        assert_eq!(registry.state("deepgram_stt"), CircuitState::Closed);
        assert!(registry.snapshot("deepgram_stt").is_none());
    }

    #[tokio::test]
    async fn test_circuit_opens_after_failures() {
        let registry = CircuitBreakerRegistry::new(None);

        for _ in 0..4 {
            registry.record_failure("openai_llm");
            assert!(registry.is_allowed("openai_llm"));
        }
        registry.record_failure("openai_llm");

        assert_eq!(registry.state("openai_llm"), CircuitState::Open);
        assert!(!registry.is_allowed("openai_llm"));
        // Other services are unaffected
        assert!(registry.is_allowed("deepgram_stt"));
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let registry = CircuitBreakerRegistry::new(None);

        for _ in 0..4 {
            registry.record_failure("cartesia_tts");
        }
        registry.record_success("cartesia_tts");
        for _ in 0..4 {
            registry.record_failure("cartesia_tts");
        }

        assert_eq!(registry.state("cartesia_tts"), CircuitState::Closed);
        assert_eq!(registry.snapshot("cartesia_tts").unwrap().failure_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown_and_recovery() {
        let registry = CircuitBreakerRegistry::new(None);
        for _ in 0..5 {
            registry.record_failure("openai_llm");
        }

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!registry.is_allowed("openai_llm"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.is_allowed("openai_llm"));
        assert_eq!(registry.state("openai_llm"), CircuitState::HalfOpen);
        // Exactly one trial is granted
        assert!(!registry.is_allowed("openai_llm"));

        registry.record_success("openai_llm");
        let snapshot = registry.snapshot("openai_llm").unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert!(registry.is_allowed("openai_llm"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_trial_is_granted_again() {
        let registry = CircuitBreakerRegistry::new(None);
        for _ in 0..5 {
            registry.record_failure("cartesia_tts");
        }
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(registry.admit("cartesia_tts"), Admission::Trial);
        assert_eq!(registry.admit("cartesia_tts"), Admission::Rejected);

        registry.release_trial("cartesia_tts");
        assert_eq!(registry.state("cartesia_tts"), CircuitState::HalfOpen);
        assert_eq!(registry.admit("cartesia_tts"), Admission::Trial);
    }

    #[test]
    fn test_release_outside_half_open_is_ignored() {
        let registry = CircuitBreakerRegistry::new(None);
        registry.release_trial("openai_llm");
        registry.record_failure("openai_llm");
        registry.release_trial("openai_llm");

        let snapshot = registry.snapshot("openai_llm").unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let registry = CircuitBreakerRegistry::new(None);
        for _ in 0..5 {
            registry.record_failure("deepgram_stt");
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.is_allowed("deepgram_stt"));

        registry.record_failure("deepgram_stt");
        assert_eq!(registry.state("deepgram_stt"), CircuitState::Open);
        assert!(!registry.is_allowed("deepgram_stt"));
    }
}
