//! # Interruption Tracking
//!
//! When the agent stops talking because the user seemed to start, the
//! interruption is real if a transcript follows and false otherwise.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Classified interruptions kept for statistics
pub const INTERRUPTION_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionKind {
    #[serde(rename = "real_interruption")]
    Real,
    #[serde(rename = "false_interruption")]
    False,
}

impl fmt::Display for InterruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptionKind::Real => write!(f, "real_interruption"),
            InterruptionKind::False => write!(f, "false_interruption"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: InterruptionKind,
    #[serde(with = "shared_types_rs::serde_secs")]
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    id: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    transcription_received: bool,
}

/// Tracks at most one open interruption at a time
#[derive(Debug, Default)]
pub struct InterruptionTracker {
    pending: Option<Pending>,
    next_id: u64,
    history: VecDeque<InterruptionEvent>,
    real_count: u64,
    false_count: u64,
}

impl InterruptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new interruption, replacing any unresolved one. Returns an id
    /// for [`resolve_if_current`](Self::resolve_if_current).
    pub fn start(&mut self, now: Instant) -> u64 {
        self.next_id += 1;
        self.pending = Some(Pending {
            id: self.next_id,
            started: now,
            started_at: Utc::now(),
            transcription_received: false,
        });
        self.next_id
    }

    pub fn is_tracking(&self) -> bool {
        self.pending.is_some()
    }

    /// Notes that the user actually said something. No-op when idle.
    pub fn mark_transcription(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            pending.transcription_received = true;
        }
    }

    /// Classifies the open interruption by whether a transcript arrived
    pub fn resolve(&mut self, now: Instant) -> Option<InterruptionEvent> {
        let pending = self.pending?;
        let kind = if pending.transcription_received {
            InterruptionKind::Real
        } else {
            InterruptionKind::False
        };
        Some(self.finish(pending, kind, now))
    }

    /// Like [`resolve`](Self::resolve), but only for the interruption `id`
    pub fn resolve_if_current(&mut self, id: u64, now: Instant) -> Option<InterruptionEvent> {
        match self.pending {
            Some(pending) if pending.id == id => self.resolve(now),
            _ => None,
        }
    }

    /// The host reported a false interruption outright
    pub fn resolve_false(&mut self, now: Instant) -> Option<InterruptionEvent> {
        let pending = self.pending?;
        Some(self.finish(pending, InterruptionKind::False, now))
    }

    fn finish(&mut self, pending: Pending, kind: InterruptionKind, now: Instant) -> InterruptionEvent {
        self.pending = None;
        let event = InterruptionEvent {
            timestamp: pending.started_at,
            kind,
            duration: now.saturating_duration_since(pending.started),
        };

        match kind {
            InterruptionKind::Real => self.real_count += 1,
            InterruptionKind::False => self.false_count += 1,
        }
        if self.history.len() == INTERRUPTION_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        event
    }

    pub fn history(&self) -> &VecDeque<InterruptionEvent> {
        &self.history
    }

    pub fn real_count(&self) -> u64 {
        self.real_count
    }

    pub fn false_count(&self) -> u64 {
        self.false_count
    }
}
