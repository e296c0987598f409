//! # Shared Types
//!
//! Types shared between the failure tolerance layer, the silence modeling
//! engine and the agent binary: the conversation session contract, the
//! events a session emits, language selection and agent settings.

pub mod language;
pub mod serde_secs;
pub mod session;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use language::Language;
pub use session::{
    AgentSession, AgentState, EventBus, ReplyOptions, SessionError, SessionEvent, UserState,
};
pub use settings::{AgentSettings, ConfigError, TtsSettings};

pub type Result<T> = std::result::Result<T, SessionError>;
