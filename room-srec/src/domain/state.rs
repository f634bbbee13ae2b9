//! Per-room recording state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Recording state of a room.
///
/// `Idle` is represented by the absence of a recording table entry; the other
/// two states live on the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
    /// Not recording; the room is eligible for probing.
    #[default]
    Idle,
    /// A recorder is capturing the room.
    Recording,
    /// A stop was issued and the recorder has not acknowledged yet.
    Stopping,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Recording => "RECORDING",
            Self::Stopping => "STOPPING",
        }
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: RecordingState) -> bool {
        use RecordingState::*;

        matches!(
            (self, target),
            (Idle, Recording) | (Recording, Idle) | (Recording, Stopping) | (Stopping, Idle)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: RecordingState) -> Result<RecordingState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::validation(format!(
                "cannot transition from {} to {}",
                self.as_str(),
                target.as_str()
            )))
        }
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(RecordingState::Idle.can_transition_to(RecordingState::Recording));
        assert!(RecordingState::Recording.can_transition_to(RecordingState::Idle));
        assert!(RecordingState::Recording.can_transition_to(RecordingState::Stopping));
        assert!(RecordingState::Stopping.can_transition_to(RecordingState::Idle));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!RecordingState::Idle.can_transition_to(RecordingState::Stopping));
        assert!(!RecordingState::Stopping.can_transition_to(RecordingState::Recording));
        assert!(!RecordingState::Idle.can_transition_to(RecordingState::Idle));
    }

    #[test]
    fn test_transition_to_error() {
        let result = RecordingState::Stopping.transition_to(RecordingState::Recording);
        assert!(result.is_err());
    }
}
