// shared-types-rs/src/session.rs
// Conversation session contract consumed by the agent core

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session is closed")]
    Closed,

    #[error("Speech output failed: {0}")]
    Speech(String),

    #[error("Reply generation failed: {0}")]
    Reply(String),

    #[error("Session operation timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// What the remote user is doing, as reported by the host's voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Listening,
    Speaking,
    Away,
}

/// What the agent itself is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Speaking,
    Listening,
    Idle,
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserState::Listening => write!(f, "listening"),
            UserState::Speaking => write!(f, "speaking"),
            UserState::Away => write!(f, "away"),
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Speaking => write!(f, "speaking"),
            AgentState::Listening => write!(f, "listening"),
            AgentState::Idle => write!(f, "idle"),
        }
    }
}

/// Events a session publishes to its subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    UserStateChanged {
        new_state: UserState,
    },
    AgentStateChanged {
        old_state: AgentState,
        new_state: AgentState,
    },
    UserInputTranscribed {
        transcript: String,
    },
    /// The host decided the last interruption carried no speech.
    AgentFalseInterruption,
}

/// Options forwarded to the host when asking for a generated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyOptions {
    pub allow_interruptions: bool,
    pub tool_choice: Option<String>,
}

impl Default for ReplyOptions {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            tool_choice: None,
        }
    }
}

/// The live conversation the agent is attached to.
///
/// Implementations speak text to the caller, ask the host model for a reply
/// and publish [`SessionEvent`]s. Every call may fail; callers decide how.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Speak `text`. When `allow_interruptions` is false the caller cannot barge in.
    async fn say(&self, text: &str, allow_interruptions: bool) -> Result<(), SessionError>;

    /// Ask the host to generate and speak a reply following `instructions`.
    async fn generate_reply(
        &self,
        instructions: &str,
        options: ReplyOptions,
    ) -> Result<String, SessionError>;

    /// A fresh receiver for the session's event stream.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Fan-out channel used by session implementations to publish events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event, returning how many subscribers received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(?event, "No subscribers for session event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
