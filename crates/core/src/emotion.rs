//! Emotion Tracking
//!
//! Derives a coarse, UI-facing emotion indicator from who is currently
//! speaking in the room. The tracker only reports a state when it changes, so
//! callers can publish every value it returns without flooding subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The emotion indicator shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmotionState {
    /// Nobody is speaking.
    #[default]
    Neutral,
    /// Idle attention, set once when a session starts.
    Interested,
    /// A remote participant is speaking.
    Listening,
    /// The agent itself is speaking.
    Talking,
}

impl EmotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionState::Neutral => "NEUTRAL",
            EmotionState::Interested => "INTERESTED",
            EmotionState::Listening => "LISTENING",
            EmotionState::Talking => "TALKING",
        }
    }
}

impl fmt::Display for EmotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an active-speakers update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSpeaker {
    pub identity: String,
    /// True when this speaker is the agent's own participant.
    pub is_local: bool,
}

impl ActiveSpeaker {
    pub fn local(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            is_local: true,
        }
    }

    pub fn remote(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            is_local: false,
        }
    }
}

/// The set of participants currently speaking, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeakerActivity {
    pub speakers: Vec<ActiveSpeaker>,
}

impl SpeakerActivity {
    pub fn new(speakers: Vec<ActiveSpeaker>) -> Self {
        Self { speakers }
    }

    pub fn silence() -> Self {
        Self::default()
    }

    /// Maps the activity onto an emotion: silence is neutral, the agent
    /// speaking wins over anyone else, otherwise the agent is listening.
    pub fn derive(&self) -> EmotionState {
        if self.speakers.is_empty() {
            EmotionState::Neutral
        } else if self.speakers.iter().any(|s| s.is_local) {
            EmotionState::Talking
        } else {
            EmotionState::Listening
        }
    }
}

/// Holds the current emotion of a session and suppresses repeated states.
#[derive(Debug, Clone, Default)]
pub struct EmotionTracker {
    current: EmotionState,
}

impl EmotionTracker {
    /// Creates a tracker in the `NEUTRAL` state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> EmotionState {
        self.current
    }

    /// Feeds a speaker-activity observation into the tracker.
    ///
    /// Returns the new state if it differs from the stored one, `None` otherwise.
    pub fn observe(&mut self, activity: &SpeakerActivity) -> Option<EmotionState> {
        self.set(activity.derive())
    }

    /// Forces a state from the session lifecycle (e.g. `INTERESTED` at start),
    /// with the same de-duplication as [`EmotionTracker::observe`].
    pub fn set(&mut self, next: EmotionState) -> Option<EmotionState> {
        if next == self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> SpeakerActivity {
        SpeakerActivity::new(vec![ActiveSpeaker::local("agent")])
    }

    fn remote() -> SpeakerActivity {
        SpeakerActivity::new(vec![ActiveSpeaker::remote("guest")])
    }

    #[test]
    fn test_derive_rules() {
        assert_eq!(SpeakerActivity::silence().derive(), EmotionState::Neutral);
        assert_eq!(local().derive(), EmotionState::Talking);
        assert_eq!(remote().derive(), EmotionState::Listening);
    }

    #[test]
    fn test_local_speaker_wins_regardless_of_position() {
        let mixed = SpeakerActivity::new(vec![
            ActiveSpeaker::remote("guest-1"),
            ActiveSpeaker::remote("guest-2"),
            ActiveSpeaker::local("agent"),
        ]);
        assert_eq!(mixed.derive(), EmotionState::Talking);

        let many_remote = SpeakerActivity::new(vec![
            ActiveSpeaker::remote("guest-2"),
            ActiveSpeaker::remote("guest-1"),
        ]);
        assert_eq!(many_remote.derive(), EmotionState::Listening);
    }

    #[test]
    fn test_repeated_state_is_emitted_once() {
        let mut tracker = EmotionTracker::new();
        assert_eq!(tracker.observe(&remote()), Some(EmotionState::Listening));
        assert_eq!(tracker.observe(&remote()), None);
        assert_eq!(tracker.observe(&remote()), None);
        assert_eq!(tracker.current(), EmotionState::Listening);
    }

    #[test]
    fn test_turn_taking_sequence() {
        let mut tracker = EmotionTracker::new();
        let sequence = [
            SpeakerActivity::silence(),
            local(),
            SpeakerActivity::silence(),
            remote(),
            SpeakerActivity::silence(),
        ];

        let emitted: Vec<EmotionState> = sequence
            .iter()
            .filter_map(|activity| tracker.observe(activity))
            .collect();

        assert_eq!(
            emitted,
            vec![
                EmotionState::Talking,
                EmotionState::Neutral,
                EmotionState::Listening,
                EmotionState::Neutral,
            ]
        );
    }

    #[test]
    fn test_emissions_bounded_by_distinct_consecutive_states() {
        let mut tracker = EmotionTracker::new();
        let sequence = [local(), local(), remote(), remote(), remote(), local()];
        let emitted = sequence
            .iter()
            .filter_map(|a| tracker.observe(a))
            .count();
        assert_eq!(emitted, 3);
    }

    #[test]
    fn test_interested_only_set_explicitly() {
        let mut tracker = EmotionTracker::new();
        assert_eq!(
            tracker.set(EmotionState::Interested),
            Some(EmotionState::Interested)
        );
        assert_eq!(tracker.set(EmotionState::Interested), None);
        assert_eq!(tracker.observe(&SpeakerActivity::silence()), Some(EmotionState::Neutral));
    }

    #[test]
    fn test_serializes_upper_case() {
        let json = serde_json::to_string(&EmotionState::Talking).unwrap();
        assert_eq!(json, "\"TALKING\"");
        assert_eq!(EmotionState::Listening.to_string(), "LISTENING");
    }
}
