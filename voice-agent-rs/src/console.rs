// voice-agent-rs/src/console.rs
// Session that speaks to the log and replays scripted events

use async_trait::async_trait;
use shared_types_rs::session::DEFAULT_EVENT_CAPACITY;
use shared_types_rs::{AgentSession, EventBus, ReplyOptions, SessionError, SessionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Stand-in for a media session: utterances are logged instead of
/// synthesized and events come from [`ConsoleSession::emit`].
#[derive(Debug)]
pub struct ConsoleSession {
    bus: EventBus,
    closed: AtomicBool,
}

impl ConsoleSession {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(DEFAULT_EVENT_CAPACITY),
            closed: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: SessionEvent) -> usize {
        info!(event = ?event, "Session event");
        self.bus.publish(event)
    }

    /// Further `say` and `generate_reply` calls fail with [`SessionError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for ConsoleSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentSession for ConsoleSession {
    async fn say(&self, text: &str, allow_interruptions: bool) -> Result<(), SessionError> {
        self.ensure_open()?;
        info!(text = %text, allow_interruptions = allow_interruptions, "Agent says");
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str, options: ReplyOptions) -> Result<String, SessionError> {
        self.ensure_open()?;
        info!(
            instructions = %instructions,
            allow_interruptions = options.allow_interruptions,
            "Generating reply"
        );
        Ok(instructions.to_string())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }
}
