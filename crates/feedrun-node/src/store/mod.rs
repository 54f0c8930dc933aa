//! Job store port: durable jobs, spec errors and advisory locks.

mod memory;

pub use memory::{MemoryDatabase, MemoryJobStore, MemoryKvStore};

use crate::kv::KvStore;
use async_trait::async_trait;
use feedrun_core::{JobId, JobSpec, NewJob, SpecError, SpecErrorId};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Job store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Spec error not found: {0}")]
    SpecErrorNotFound(SpecErrorId),

    /// The store session was closed; its locks are gone.
    #[error("Store session is closed")]
    SessionClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Durable job storage as seen by one node.
///
/// Advisory locks are owned by the store session: closing or dropping the
/// session releases every lock it holds.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Jobs whose ids are not in `exclude`.
    async fn unclaimed_jobs(&self, exclude: &[JobId]) -> Result<Vec<JobSpec>, StoreError>;

    /// Unclaimed jobs for which this session obtained the advisory lock
    /// `(lock_class, job id)`. Jobs locked elsewhere are skipped.
    async fn claim_unclaimed_jobs(
        &self,
        exclude: &[JobId],
        lock_class: i32,
    ) -> Result<Vec<JobSpec>, StoreError> {
        let mut claimed = Vec::new();
        for job in self.unclaimed_jobs(exclude).await? {
            if self.try_advisory_lock(lock_class, job.id).await? {
                claimed.push(job);
            } else {
                debug!(job_id = %job.id, "Job locked by another node");
            }
        }
        Ok(claimed)
    }

    async fn create_job(&self, job: NewJob) -> Result<JobSpec, StoreError>;

    /// Delete a job together with its spec errors and KV entries.
    async fn delete_job(&self, id: JobId) -> Result<(), StoreError>;

    /// The subset of `ids` that no longer exist.
    async fn check_for_deleted_jobs(&self, ids: &[JobId]) -> Result<Vec<JobId>, StoreError>;

    /// Record a job failure. Repeats of the same description bump the
    /// occurrence counter of the existing record.
    async fn record_error(&self, job_id: JobId, description: &str) -> Result<SpecError, StoreError>;

    async fn find_job(&self, id: JobId) -> Result<JobSpec, StoreError>;

    async fn jobs(&self) -> Result<Vec<JobSpec>, StoreError>;

    async fn spec_errors(&self, job_id: JobId) -> Result<Vec<SpecError>, StoreError>;

    async fn find_spec_error(&self, id: SpecErrorId) -> Result<SpecError, StoreError>;

    async fn dismiss_error(&self, id: SpecErrorId) -> Result<(), StoreError>;

    /// Try to take the lock without waiting.
    async fn try_advisory_lock(&self, lock_class: i32, id: JobId) -> Result<bool, StoreError>;

    async fn advisory_unlock(&self, lock_class: i32, id: JobId) -> Result<(), StoreError>;

    /// Key/value store scoped to one job.
    fn kv_store(&self, job_id: JobId) -> Arc<dyn KvStore>;
}
