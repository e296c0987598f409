// shared-types-rs/src/testing.rs
// In-memory session for tests in this and downstream crates

use crate::session::{AgentSession, EventBus, ReplyOptions, SessionError, SessionEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// A spoken utterance captured by [`RecordingSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub allow_interruptions: bool,
}

/// Session that records what it was asked to say and lets tests inject
/// events and failures.
#[derive(Debug, Default)]
pub struct RecordingSession {
    bus: EventBus,
    spoken: Mutex<Vec<Utterance>>,
    say_failures: Mutex<VecDeque<SessionError>>,
    replies: Mutex<VecDeque<Result<String, SessionError>>>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event to every subscriber.
    pub fn emit(&self, event: SessionEvent) -> usize {
        self.bus.publish(event)
    }

    /// The next `say` calls fail with these errors, in order.
    pub fn fail_next_say(&self, error: SessionError) {
        self.say_failures.lock().unwrap().push_back(error);
    }

    /// Queue the outcome of the next `generate_reply` call.
    pub fn push_reply(&self, reply: Result<String, SessionError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken().into_iter().map(|u| u.text).collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

#[async_trait]
impl AgentSession for RecordingSession {
    async fn say(&self, text: &str, allow_interruptions: bool) -> Result<(), SessionError> {
        if let Some(err) = self.say_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.spoken.lock().unwrap().push(Utterance {
            text: text.to_string(),
            allow_interruptions,
        });
        Ok(())
    }

    async fn generate_reply(
        &self,
        instructions: &str,
        _options: ReplyOptions,
    ) -> Result<String, SessionError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("reply to: {}", instructions)))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_fails_on_demand() {
        let session = RecordingSession::new();
        session.fail_next_say(SessionError::Closed);

        assert_eq!(session.say("first", true).await, Err(SessionError::Closed));
        session.say("second", false).await.unwrap();

        assert_eq!(
            session.spoken(),
            vec![Utterance {
                text: "second".to_string(),
                allow_interruptions: false
            }]
        );
    }

    #[tokio::test]
    async fn test_queued_replies() {
        let session = RecordingSession::new();
        session.push_reply(Err(SessionError::Reply("model offline".to_string())));

        assert!(session
            .generate_reply("greet", ReplyOptions::default())
            .await
            .is_err());
        assert_eq!(
            session
                .generate_reply("greet", ReplyOptions::default())
                .await
                .unwrap(),
            "reply to: greet"
        );
    }
}
