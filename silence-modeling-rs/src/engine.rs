//! # Silence Modeling Engine
//!
//! Follows a session's events, classifies the user's silences on a fixed
//! tick, drops in backchannels and tells real interruptions from false ones.
//!
//! The engine runs two tasks while started: one consuming session events
//! and one monitoring loop. Interruption checks and backchannels run as
//! further tasks tracked by the engine so [`SilenceModelingEngine::stop`]
//! can cancel all of them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use shared_types_rs::{AgentSession, AgentState, Language, SessionEvent, UserState};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::backchannel::BackchannelManager;
use crate::interruption::{InterruptionEvent, InterruptionKind, InterruptionTracker};
use crate::state_machine::{SilenceState, SilenceStateMachine};
use crate::timing::{ConversationalConfig, CulturalTimingRules};

/// Monitoring loop period
pub const CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub const SILENCE_EVENT_LIMIT: usize = 100;
pub const RESPONSE_DELAY_LIMIT: usize = 100;

/// Entries in the `recent_*` slices of [`SilenceStats`]
const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceEvent {
    pub timestamp: DateTime<Utc>,
    pub classification: SilenceState,
    #[serde(with = "shared_types_rs::serde_secs")]
    pub duration: Duration,
    pub language: Language,
}

/// Snapshot returned by [`SilenceModelingEngine::get_stats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceStats {
    pub language: String,
    pub total_silence_events: usize,
    pub backchannels_triggered: u64,
    pub total_responses: usize,
    /// Seconds
    pub avg_response_delay: f64,
    pub recent_silence_events: Vec<SilenceEvent>,
    pub real_interruptions: u64,
    pub false_interruptions: u64,
    pub recent_interruptions: Vec<InterruptionEvent>,
}

struct EngineState {
    machine: SilenceStateMachine,
    backchannel: BackchannelManager,
    interruptions: InterruptionTracker,
    last_user_state: UserState,
    silence_events: VecDeque<SilenceEvent>,
    response_delays: VecDeque<Duration>,
    backchannels_triggered: u64,
    deferred_check: Option<JoinHandle<()>>,
}

type SharedState = Arc<Mutex<EngineState>>;

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    // Every section leaves the state consistent, so a poisoned lock is still usable
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SilenceModelingEngine {
    session: Arc<dyn AgentSession>,
    rules: CulturalTimingRules,
    false_interruption_timeout: Option<Duration>,
    state: SharedState,
    event_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for SilenceModelingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SilenceModelingEngine")
            .field("language", &self.rules.language)
            .field("false_interruption_timeout", &self.false_interruption_timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SilenceModelingEngine {
    /// Uses the language's default false-interruption timeout
    pub fn new(session: Arc<dyn AgentSession>, rules: CulturalTimingRules) -> Self {
        let timeout = ConversationalConfig::for_language(rules.language, false, None).false_interruption_timeout;
        Self::with_false_interruption_timeout(session, rules, timeout)
    }

    pub fn from_config(
        session: Arc<dyn AgentSession>,
        rules: CulturalTimingRules,
        conversation: &ConversationalConfig,
    ) -> Self {
        Self::with_false_interruption_timeout(session, rules, conversation.false_interruption_timeout)
    }

    /// `None` leaves interruptions to be resolved by the agent resuming or
    /// by an explicit false-interruption event
    pub fn with_false_interruption_timeout(
        session: Arc<dyn AgentSession>,
        rules: CulturalTimingRules,
        false_interruption_timeout: Option<Duration>,
    ) -> Self {
        let state = EngineState {
            machine: SilenceStateMachine::new(rules.clone()),
            backchannel: BackchannelManager::new(rules.language, Arc::clone(&session)),
            interruptions: InterruptionTracker::new(),
            last_user_state: UserState::Listening,
            silence_events: VecDeque::with_capacity(SILENCE_EVENT_LIMIT),
            response_delays: VecDeque::with_capacity(RESPONSE_DELAY_LIMIT),
            backchannels_triggered: 0,
            deferred_check: None,
        };

        Self {
            session,
            rules,
            false_interruption_timeout,
            state: Arc::new(Mutex::new(state)),
            event_task: None,
            monitor_task: None,
        }
    }

    pub fn rules(&self) -> &CulturalTimingRules {
        &self.rules
    }

    /// True between `start` and `stop`, even after the monitoring loop has
    /// ended on disengagement
    pub fn is_running(&self) -> bool {
        self.event_task.is_some()
    }

    /// True while the monitoring loop is ticking
    pub fn is_monitoring(&self) -> bool {
        self.monitor_task.as_ref().map_or(false, |task| !task.is_finished())
    }

    pub fn silence_state(&self) -> SilenceState {
        lock(&self.state).machine.state()
    }

    /// Subscribes to the session and starts monitoring. Calling it on a
    /// running engine does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let events = self.session.subscribe();
        self.event_task = Some(tokio::spawn(run_event_loop(
            events,
            Arc::clone(&self.state),
            self.false_interruption_timeout,
        )));
        self.monitor_task = Some(tokio::spawn(run_monitor(Arc::clone(&self.state))));

        info!(language = %self.rules.language, "Silence modeling engine started");
    }

    /// Cancels the event and monitoring tasks, then any pending
    /// interruption check and backchannel, waiting for each to finish.
    pub async fn stop(&mut self) {
        for task in [self.event_task.take(), self.monitor_task.take()].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }

        // Nothing can spawn new work once both loops are gone
        let (deferred_check, backchannel) = {
            let mut state = lock(&self.state);
            (state.deferred_check.take(), state.backchannel.take_task())
        };
        for task in [deferred_check, backchannel].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }

        info!(language = %self.rules.language, "Silence modeling engine stopped");
    }

    pub fn get_stats(&self) -> SilenceStats {
        let state = lock(&self.state);

        let avg_response_delay = if state.response_delays.is_empty() {
            0.0
        } else {
            let total: f64 = state.response_delays.iter().map(Duration::as_secs_f64).sum();
            total / state.response_delays.len() as f64
        };

        SilenceStats {
            language: self.rules.language.tag().to_string(),
            total_silence_events: state.silence_events.len(),
            backchannels_triggered: state.backchannels_triggered,
            total_responses: state.response_delays.len(),
            avg_response_delay,
            recent_silence_events: last_n(&state.silence_events, RECENT_LIMIT),
            real_interruptions: state.interruptions.real_count(),
            false_interruptions: state.interruptions.false_count(),
            recent_interruptions: last_n(state.interruptions.history(), RECENT_LIMIT),
        }
    }
}

impl Drop for SilenceModelingEngine {
    fn drop(&mut self) {
        for task in [self.event_task.take(), self.monitor_task.take()].into_iter().flatten() {
            task.abort();
        }
        // Never block in drop; a task still holding the lock is already aborted
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        for task in [state.deferred_check.take(), state.backchannel.take_task()].into_iter().flatten() {
            task.abort();
        }
    }
}

fn last_n<T: Clone>(items: &VecDeque<T>, n: usize) -> Vec<T> {
    items.iter().skip(items.len().saturating_sub(n)).cloned().collect()
}

async fn run_event_loop(
    mut events: broadcast::Receiver<SessionEvent>,
    state: SharedState,
    false_interruption_timeout: Option<Duration>,
) {
    loop {
        match events.recv().await {
            Ok(event) => handle_event(&state, event, false_interruption_timeout),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Silence engine fell behind session events");
            }
            Err(RecvError::Closed) => {
                debug!("Session event stream closed");
                break;
            }
        }
    }
}

fn handle_event(state: &SharedState, event: SessionEvent, false_interruption_timeout: Option<Duration>) {
    let now = Instant::now();
    let mut guard = lock(state);

    match event {
        SessionEvent::UserStateChanged { new_state } => {
            guard.last_user_state = new_state;
            match new_state {
                UserState::Listening => {
                    // The user just went quiet; silence counts from here
                    guard.machine.reset();
                    guard.machine.mark_speech_ended(now);
                }
                UserState::Speaking => guard.machine.reset(),
                UserState::Away => {}
            }
        }
        SessionEvent::UserInputTranscribed { transcript } => {
            if !transcript.is_empty() {
                guard.machine.update_transcription(transcript, now);
                guard.interruptions.mark_transcription();
            }
        }
        SessionEvent::AgentStateChanged { old_state, new_state } => match (old_state, new_state) {
            (AgentState::Speaking, AgentState::Listening) => {
                let id = guard.interruptions.start(now);
                debug!(interruption = id, "Agent stopped speaking, tracking interruption");

                if let Some(timeout) = false_interruption_timeout {
                    let shared = Arc::clone(state);
                    let check = tokio::spawn(async move {
                        sleep(timeout).await;
                        let resolved = lock(&shared).interruptions.resolve_if_current(id, Instant::now());
                        if let Some(event) = resolved {
                            record_interruption(&event);
                        }
                    });
                    if let Some(previous) = guard.deferred_check.replace(check) {
                        previous.abort();
                    }
                }
            }
            (AgentState::Listening, AgentState::Speaking) => {
                if let Some(check) = guard.deferred_check.take() {
                    check.abort();
                }
                if let Some(event) = guard.interruptions.resolve(now) {
                    record_interruption(&event);
                }
            }
            _ => {}
        },
        SessionEvent::AgentFalseInterruption => {
            if let Some(check) = guard.deferred_check.take() {
                check.abort();
            }
            if let Some(event) = guard.interruptions.resolve_false(now) {
                record_interruption(&event);
            }
        }
    }
}

fn record_interruption(event: &InterruptionEvent) {
    info!(
        kind = %event.kind,
        duration_secs = event.duration.as_secs_f64(),
        "Interruption classified"
    );
    match event.kind {
        InterruptionKind::Real => {
            counter!("silence.interruptions.real", 1);
        }
        InterruptionKind::False => {
            counter!("silence.interruptions.false", 1);
        }
    }
}

async fn run_monitor(state: SharedState) {
    loop {
        let keep_going = monitor_tick(&mut lock(&state));
        if !keep_going {
            break;
        }
        sleep(CHECK_INTERVAL).await;
    }
}

/// One pass of the monitoring loop. Returns false once the user disengaged.
fn monitor_tick(state: &mut EngineState) -> bool {
    let has_speech = state.last_user_state == UserState::Speaking;
    let decision = state.machine.update(has_speech, None);
    let silence = state.machine.silence_duration();
    let language = state.machine.rules().language;

    if decision.state != SilenceState::Speaking {
        if state.silence_events.len() == SILENCE_EVENT_LIMIT {
            state.silence_events.pop_front();
        }
        state.silence_events.push_back(SilenceEvent {
            timestamp: Utc::now(),
            classification: decision.state,
            duration: silence,
            language,
        });
        debug!(
            classification = %decision.state,
            silence_secs = silence.as_secs_f64(),
            language = %language,
            "Silence classified"
        );
    }

    if decision.should_backchannel && state.backchannel.trigger() {
        state.backchannels_triggered += 1;
    }

    if decision.should_respond {
        if state.response_delays.len() == RESPONSE_DELAY_LIMIT {
            state.response_delays.pop_front();
        }
        state.response_delays.push_back(silence);
        let rules = state.machine.rules();
        info!(
            delay_secs = silence.as_secs_f64(),
            target_min_secs = rules.min_response_delay.as_secs_f64(),
            target_max_secs = rules.max_response_delay.as_secs_f64(),
            language = %language,
            "Response timing"
        );
    }

    if decision.state == SilenceState::Disengagement {
        info!(language = %language, "User disengaged, stopping silence monitoring");
        return false;
    }
    true
}
