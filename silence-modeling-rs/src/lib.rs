//! # Silence Modeling
//!
//! Culturally aware turn-taking for the voice agent. Japanese and English
//! speakers pause, acknowledge and interrupt differently; this crate turns
//! those differences into timing rules and applies them to a live session.
//!
//! ## Features
//!
//! - Cultural timing profiles and per-language conversational settings
//! - Silence classification from speech activity and transcript timing
//! - Rate-limited backchannel utterances
//! - Real versus false interruption tracking
//! - An engine wiring all of the above to a session's event stream
//!

pub mod timing;
pub mod state_machine;
pub mod backchannel;
pub mod interruption;
pub mod engine;

pub use timing::{BackchannelFrequency, ConversationalConfig, CulturalTimingRules, SilenceThresholds, TtsPacing};
pub use state_machine::{SilenceDecision, SilenceState, SilenceStateMachine};
pub use backchannel::BackchannelManager;
pub use interruption::{InterruptionEvent, InterruptionKind, InterruptionTracker};
pub use engine::{SilenceEvent, SilenceModelingEngine, SilenceStats};
