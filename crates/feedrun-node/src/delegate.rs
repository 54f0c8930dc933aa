//! Job-type delegates and the long-running services they build.

use async_trait::async_trait;
use feedrun_core::{JobSpec, JobType};
use feedrun_pipeline::GraphError;
use thiserror::Error;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid job config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Failed to start service: {0}")]
    Start(String),

    #[error("Failed to stop service: {0}")]
    Stop(String),
}

/// A long-running unit of work owned by a claimed job.
#[async_trait]
pub trait Service: Send {
    async fn start(&mut self) -> Result<(), ServiceError>;

    /// Returns once in-flight work has finished.
    async fn stop(&mut self) -> Result<(), ServiceError>;
}

/// Builds the services of one job type.
#[async_trait]
pub trait Delegate: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Services to start, in order, when a job of this type is claimed.
    async fn services_for_spec(&self, spec: &JobSpec) -> Result<Vec<Box<dyn Service>>, ServiceError>;
}
