//! feedrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! All types here represent the core business domain of feedrun: jobs,
//! pipeline runs and the ownership state of claimed jobs.

pub mod error;
pub mod ids;
pub mod job;
pub mod run;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{JobId, RunId, SpecErrorId, TaskRunId};
pub use job::{JobSpec, JobType, NewJob, SpecError};
pub use run::{Run, TaskRun};
pub use status::{ClaimState, RunStatus};
