//! Core domain errors.

use crate::ClaimState;
use thiserror::Error;

/// Errors raised by the domain types and the run store.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// A claim state change the lifecycle does not allow.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: ClaimState, to: ClaimState },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
