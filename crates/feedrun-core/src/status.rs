//! Status enums for Runs and claimed Jobs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Status of a pipeline Run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is executing.
    #[default]
    Running,
    /// Every terminal task produced a value (or a tolerated empty result).
    Completed,
    /// At least one terminal task produced an error.
    Errored,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }
}

/// Ownership state of a job on one node.
///
/// ```text
/// Unclaimed -> Claiming -> Running -> Stopping -> Unclaimed | Deleted
///                  \-> Unclaimed (lock not acquired or start failed)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimState {
    #[default]
    Unclaimed,
    Claiming,
    Running,
    Stopping,
    Deleted,
}

impl ClaimState {
    /// Check whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ClaimState) -> bool {
        use ClaimState::*;
        matches!(
            (self, next),
            (Unclaimed, Claiming)
                | (Claiming, Running)
                | (Claiming, Unclaimed)
                | (Running, Stopping)
                | (Stopping, Unclaimed)
                | (Stopping, Deleted)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(self, next: ClaimState) -> Result<ClaimState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for ClaimState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unclaimed => "unclaimed",
            Self::Claiming => "claiming",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_lifecycle() {
        let state = ClaimState::Unclaimed
            .transition(ClaimState::Claiming)
            .and_then(|s| s.transition(ClaimState::Running))
            .and_then(|s| s.transition(ClaimState::Stopping))
            .and_then(|s| s.transition(ClaimState::Deleted))
            .unwrap();
        assert_eq!(state, ClaimState::Deleted);
    }

    #[test]
    fn test_illegal_transition() {
        let err = ClaimState::Unclaimed
            .transition(ClaimState::Running)
            .unwrap_err();
        assert!(err.to_string().contains("unclaimed -> running"));
        assert!(matches!(
            err,
            CoreError::InvalidStateTransition {
                from: ClaimState::Unclaimed,
                to: ClaimState::Running
            }
        ));
        assert!(!ClaimState::Deleted.can_transition_to(ClaimState::Claiming));
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Errored.is_terminal());
    }
}
