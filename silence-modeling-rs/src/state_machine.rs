//! # Silence State Machine
//!
//! Classifies the current silence into a bucket using the cultural
//! thresholds, and says whether the agent should answer or acknowledge.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::timing::{BackchannelFrequency, CulturalTimingRules};

/// Transcript segments older than this are dropped
pub const TRANSCRIPT_WINDOW: Duration = Duration::from_secs(5);

/// A thinking pause must last longer than this to earn a backchannel
const BACKCHANNEL_MIN_SILENCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceState {
    None,
    Speaking,
    NormalPause,
    Thinking,
    EndOfSpeech,
    Disengagement,
}

impl SilenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SilenceState::None => "none",
            SilenceState::Speaking => "speaking",
            SilenceState::NormalPause => "normal_pause",
            SilenceState::Thinking => "thinking",
            SilenceState::EndOfSpeech => "end_of_speech",
            SilenceState::Disengagement => "disengagement",
        }
    }
}

impl fmt::Display for SilenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceDecision {
    pub state: SilenceState,
    pub should_respond: bool,
    pub should_backchannel: bool,
}

impl SilenceDecision {
    fn quiet(state: SilenceState) -> Self {
        Self {
            state,
            should_respond: false,
            should_backchannel: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SilenceStateMachine {
    rules: CulturalTimingRules,
    state: SilenceState,
    silence_duration: Duration,
    last_speech: Option<Instant>,
    last_transcription: Option<Instant>,
    segments: VecDeque<(Instant, String)>,
}

impl SilenceStateMachine {
    pub fn new(rules: CulturalTimingRules) -> Self {
        Self {
            rules,
            state: SilenceState::None,
            silence_duration: Duration::ZERO,
            last_speech: None,
            last_transcription: None,
            segments: VecDeque::new(),
        }
    }

    pub fn rules(&self) -> &CulturalTimingRules {
        &self.rules
    }

    pub fn state(&self) -> SilenceState {
        self.state
    }

    pub fn silence_duration(&self) -> Duration {
        self.silence_duration
    }

    pub fn update(&mut self, has_speech: bool, transcription_time: Option<Instant>) -> SilenceDecision {
        self.update_at(Instant::now(), has_speech, transcription_time)
    }

    /// [`update`](Self::update) against an explicit clock reading
    pub fn update_at(&mut self, now: Instant, has_speech: bool, transcription_time: Option<Instant>) -> SilenceDecision {
        if has_speech {
            self.state = SilenceState::Speaking;
            self.silence_duration = Duration::ZERO;
            self.last_speech = Some(now);
            if transcription_time.is_some() {
                self.last_transcription = transcription_time;
            }
            return SilenceDecision::quiet(SilenceState::Speaking);
        }

        // Silence is measured from speech, else from the last transcript
        self.silence_duration = self
            .last_speech
            .or(self.last_transcription)
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));

        let silence = self.silence_duration;
        let thresholds = &self.rules.thresholds;

        let decision = if silence < thresholds.normal_pause {
            SilenceDecision::quiet(SilenceState::NormalPause)
        } else if silence < thresholds.thinking {
            let eager = matches!(
                self.rules.backchannel_frequency,
                BackchannelFrequency::High | BackchannelFrequency::Medium
            );
            SilenceDecision {
                state: SilenceState::Thinking,
                should_respond: false,
                should_backchannel: eager && silence > BACKCHANNEL_MIN_SILENCE,
            }
        } else if silence < thresholds.end_of_speech {
            SilenceDecision {
                state: SilenceState::EndOfSpeech,
                should_respond: self.rules.min_response_delay <= silence
                    && silence <= self.rules.max_response_delay,
                should_backchannel: false,
            }
        } else {
            SilenceDecision::quiet(SilenceState::Disengagement)
        };

        self.state = decision.state;
        decision
    }

    /// Records a transcript segment, keeping only the last five seconds
    pub fn update_transcription(&mut self, text: impl Into<String>, timestamp: Instant) {
        self.segments.push_back((timestamp, text.into()));
        self.last_transcription = Some(timestamp);

        if let Some(cutoff) = timestamp.checked_sub(TRANSCRIPT_WINDOW) {
            self.segments.retain(|(at, _)| *at > cutoff);
        }
    }

    /// Starts measuring silence from `at`
    pub fn mark_speech_ended(&mut self, at: Instant) {
        self.last_speech = Some(at);
    }

    pub fn recent_transcripts(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(|(_, text)| text.as_str())
    }

    /// Clears the timing state. Recent transcripts are kept.
    pub fn reset(&mut self) {
        self.state = SilenceState::None;
        self.silence_duration = Duration::ZERO;
        self.last_speech = None;
        self.last_transcription = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::SilenceThresholds;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn silent_for(machine: &mut SilenceStateMachine, silence: Duration) -> SilenceDecision {
        let start = Instant::now();
        machine.reset();
        machine.mark_speech_ended(start);
        machine.update_at(start + silence, false, None)
    }

    #[test]
    fn test_english_buckets() {
        let mut machine = SilenceStateMachine::new(CulturalTimingRules::english());

        assert_eq!(silent_for(&mut machine, ms(100)).state, SilenceState::NormalPause);
        assert_eq!(silent_for(&mut machine, ms(250)).state, SilenceState::Thinking);
        assert_eq!(silent_for(&mut machine, ms(700)).state, SilenceState::EndOfSpeech);
        assert_eq!(silent_for(&mut machine, ms(1500)).state, SilenceState::Disengagement);
        assert_eq!(machine.silence_duration(), ms(1500));
    }

    #[test]
    fn test_bucket_bounds_are_exclusive() {
        let mut machine = SilenceStateMachine::new(CulturalTimingRules::english());

        // Exactly on a bound falls into the next bucket up
        assert_eq!(silent_for(&mut machine, ms(200)).state, SilenceState::Thinking);
        assert_eq!(silent_for(&mut machine, ms(500)).state, SilenceState::EndOfSpeech);
        assert_eq!(silent_for(&mut machine, ms(1000)).state, SilenceState::Disengagement);
    }

    #[test]
    fn test_speech_resets_silence() {
        let mut machine = SilenceStateMachine::new(CulturalTimingRules::japanese());
        let start = Instant::now();

        let decision = machine.update_at(start, true, None);
        assert_eq!(decision, SilenceDecision::quiet(SilenceState::Speaking));
        assert_eq!(machine.state(), SilenceState::Speaking);

        let decision = machine.update_at(start + ms(400), false, None);
        assert_eq!(decision.state, SilenceState::Thinking);
    }

    #[test]
    fn test_backchannel_only_for_eager_cultures() {
        let mut japanese = SilenceStateMachine::new(CulturalTimingRules::japanese());
        let thinking_short = silent_for(&mut japanese, ms(400));
        assert_eq!(thinking_short.state, SilenceState::Thinking);
        assert!(!thinking_short.should_backchannel);

        let thinking_long = silent_for(&mut japanese, ms(600));
        assert_eq!(thinking_long.state, SilenceState::Thinking);
        assert!(thinking_long.should_backchannel);

        // Widen the thinking bucket so a long pause stays in it
        let mut rules = CulturalTimingRules::english();
        rules.thresholds.thinking = ms(900);
        let mut english = SilenceStateMachine::new(rules);
        let decision = silent_for(&mut english, ms(600));
        assert_eq!(decision.state, SilenceState::Thinking);
        assert!(!decision.should_backchannel);
    }

    #[test]
    fn test_respond_inside_cultural_window() {
        let mut rules = CulturalTimingRules::japanese();
        rules.thresholds = SilenceThresholds {
            normal_pause: ms(100),
            thinking: ms(150),
            end_of_speech: ms(2000),
            disengagement: ms(5000),
        };
        let mut machine = SilenceStateMachine::new(rules);

        let early = silent_for(&mut machine, ms(180));
        assert_eq!(early.state, SilenceState::EndOfSpeech);
        assert!(!early.should_respond);

        assert!(silent_for(&mut machine, ms(200)).should_respond);
        assert!(silent_for(&mut machine, ms(350)).should_respond);
        assert!(silent_for(&mut machine, ms(500)).should_respond);

        let late = silent_for(&mut machine, ms(900));
        assert_eq!(late.state, SilenceState::EndOfSpeech);
        assert!(!late.should_respond);
    }

    #[test]
    fn test_transcription_drives_silence_without_speech() {
        let mut machine = SilenceStateMachine::new(CulturalTimingRules::english());
        let start = Instant::now();

        machine.update_transcription("hello", start);
        let decision = machine.update_at(start + ms(300), false, None);
        assert_eq!(decision.state, SilenceState::Thinking);

        // With no reference point at all, silence is zero
        machine.reset();
        let decision = machine.update_at(start + ms(300), false, None);
        assert_eq!(decision.state, SilenceState::NormalPause);
        assert_eq!(machine.silence_duration(), Duration::ZERO);
    }

    #[test]
    fn test_transcript_window() {
        let mut machine = SilenceStateMachine::new(CulturalTimingRules::english());
        let start = Instant::now();

        machine.update_transcription("one", start);
        machine.update_transcription("two", start + ms(3000));
        machine.update_transcription("three", start + ms(5000));
        assert_eq!(machine.recent_transcripts().collect::<Vec<_>>(), vec!["two", "three"]);

        machine.reset();
        assert_eq!(machine.state(), SilenceState::None);
        assert_eq!(machine.recent_transcripts().count(), 2);
    }
}
