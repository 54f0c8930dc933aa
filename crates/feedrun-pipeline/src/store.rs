//! Persistence port for finished runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedrun_core::{CoreError, JobId, Run, RunId, RunStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable storage for finished pipeline runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a completed or errored run.
    async fn insert_finished_run(&self, run: Run) -> Result<(), CoreError>;

    async fn find_run(&self, id: &RunId) -> Result<Run, CoreError>;

    /// Runs of a job, newest first.
    async fn runs_for_job(&self, job_id: JobId) -> Result<Vec<Run>, CoreError>;

    /// Delete runs created before `cutoff`; returns how many were removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError>;
}

/// In-memory run store.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert_finished_run(&self, run: Run) -> Result<(), CoreError> {
        if run.status == RunStatus::Running || run.finished_at.is_none() {
            return Err(CoreError::InvalidInput(format!(
                "run {} is not finished",
                run.id
            )));
        }
        self.runs.write().await.insert(run.id.clone(), run);
        Ok(())
    }

    async fn find_run(&self, id: &RunId) -> Result<Run, CoreError> {
        self.runs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::RunNotFound(id.to_string()))
    }

    async fn runs_for_job(&self, job_id: JobId) -> Result<Vec<Run>, CoreError> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.job_id == Some(job_id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError> {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, r| r.created_at >= cutoff);
        Ok(before - runs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(job: i32) -> Run {
        let mut run = Run::new(Some(JobId::new(job)));
        run.finish(vec![Some(serde_json::json!("1"))], vec![None]);
        run
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryRunStore::new();
        let run = finished(1);
        store.insert_finished_run(run.clone()).await.unwrap();
        assert_eq!(store.find_run(&run.id).await.unwrap(), run);
        assert!(matches!(
            store.find_run(&RunId::new("missing")).await,
            Err(CoreError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_running_run() {
        let store = MemoryRunStore::new();
        let err = store.insert_finished_run(Run::new(None)).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_runs_for_job_and_prune() {
        let store = MemoryRunStore::new();
        let mut old = finished(1);
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        store.insert_finished_run(old).await.unwrap();
        store.insert_finished_run(finished(1)).await.unwrap();
        store.insert_finished_run(finished(2)).await.unwrap();

        let runs = store.runs_for_job(JobId::new(1)).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].created_at > runs[1].created_at);

        let removed = store
            .prune_before(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 2);
    }
}
