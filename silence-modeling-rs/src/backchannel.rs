//! # Backchannels
//!
//! Short acknowledgements ("I see", "はい") spoken while the user pauses to
//! think. Each one runs as its own task so it never holds up the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rand::seq::SliceRandom;
use shared_types_rs::{AgentSession, Language};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Minimum gap between two backchannels
pub const MIN_BACKCHANNEL_INTERVAL: Duration = Duration::from_secs(2);

const JAPANESE_PHRASES: &[&str] = &["はい", "ええ", "そうですね", "なるほど", "ああ"];
const ENGLISH_PHRASES: &[&str] = &["I see", "Okay", "Right", "Got it", "Mm-hmm"];

pub fn phrases(language: Language) -> &'static [&'static str] {
    match language {
        Language::Japanese => JAPANESE_PHRASES,
        Language::English => ENGLISH_PHRASES,
    }
}

pub struct BackchannelManager {
    language: Language,
    session: Arc<dyn AgentSession>,
    min_interval: Duration,
    last_trigger: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for BackchannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackchannelManager")
            .field("language", &self.language)
            .field("last_trigger", &self.last_trigger)
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

impl BackchannelManager {
    pub fn new(language: Language, session: Arc<dyn AgentSession>) -> Self {
        Self {
            language,
            session,
            min_interval: MIN_BACKCHANNEL_INTERVAL,
            last_trigger: None,
            task: None,
        }
    }

    /// True while the last backchannel is still being spoken
    pub fn is_in_flight(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Speaks a random acknowledgement unless one was triggered less than
    /// the minimum interval ago or is still playing. Must be called from
    /// within a Tokio runtime.
    pub fn trigger(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        if self.is_in_flight() {
            debug!("Previous backchannel still playing");
            return false;
        }

        let Some(phrase) = phrases(self.language).choose(&mut rand::thread_rng()).copied() else {
            return false;
        };

        let session = Arc::clone(&self.session);
        self.task = Some(tokio::spawn(async move {
            // The user may talk over it
            if let Err(err) = session.say(phrase, true).await {
                error!(phrase = %phrase, error = %err, "Failed to say backchannel");
            }
        }));
        self.last_trigger = Some(now);

        info!(phrase = %phrase, language = %self.language, "Triggered backchannel");
        counter!("silence.backchannels", 1, "language" => self.language.tag());
        true
    }

    /// Cancels a backchannel that is still playing and waits for it to end
    pub async fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    /// Hands the in-flight task to the caller, leaving none tracked
    pub(crate) fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared_types_rs::testing::RecordingSession;
    use shared_types_rs::{EventBus, ReplyOptions, SessionError, SessionEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{broadcast, Notify};

    /// Utterances last until the test releases them
    #[derive(Default)]
    struct HeldSession {
        bus: EventBus,
        release: Notify,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl AgentSession for HeldSession {
        async fn say(&self, _text: &str, _allow_interruptions: bool) -> Result<(), SessionError> {
            self.release.notified().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn generate_reply(&self, instructions: &str, _options: ReplyOptions) -> Result<String, SessionError> {
            Ok(instructions.to_string())
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
            self.bus.subscribe()
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_is_rate_limited() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = BackchannelManager::new(Language::English, session.clone());

        assert!(manager.trigger());
        settle().await;
        assert!(!manager.trigger());

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(!manager.trigger());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(manager.trigger());
        settle().await;

        let spoken = session.spoken();
        assert_eq!(spoken.len(), 2);
        for utterance in spoken {
            assert!(ENGLISH_PHRASES.contains(&utterance.text.as_str()));
            assert!(utterance.allow_interruptions);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_backchannel_blocks_the_next() {
        let session = Arc::new(HeldSession::default());
        let mut manager = BackchannelManager::new(Language::Japanese, session.clone());

        assert!(manager.trigger());
        settle().await;

        // Past the interval, but the first one is still being spoken
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(manager.is_in_flight());
        assert!(!manager.trigger());

        session.release.notify_one();
        settle().await;
        assert!(!manager.is_in_flight());
        assert_eq!(session.finished.load(Ordering::SeqCst), 1);

        assert!(manager.trigger());
        manager.cancel().await;
        assert_eq!(session.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_japanese_phrases() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = BackchannelManager::new(Language::Japanese, session.clone());

        assert!(manager.trigger());
        manager.cancel().await;
        settle().await;

        for text in session.spoken_texts() {
            assert!(JAPANESE_PHRASES.contains(&text.as_str()));
        }
    }

    #[tokio::test]
    async fn test_failed_utterance_is_contained() {
        let session = Arc::new(RecordingSession::new());
        session.fail_next_say(SessionError::Speech("tts offline".into()));
        let mut manager = BackchannelManager::new(Language::English, session.clone());

        assert!(manager.trigger());
        if let Some(task) = manager.take_task() {
            assert!(task.await.is_ok());
        }
        assert!(session.spoken().is_empty());
        assert!(!manager.is_in_flight());
    }

    #[test]
    fn test_cancel_without_backchannel() {
        let session = Arc::new(RecordingSession::new());
        let mut manager = BackchannelManager::new(Language::English, session);

        tokio_test::block_on(manager.cancel());
        assert!(!manager.is_in_flight());
    }

    #[test]
    fn test_phrase_lists() {
        assert_eq!(phrases(Language::Japanese).len(), 5);
        assert_eq!(phrases(Language::English)[0], "I see");
    }
}
