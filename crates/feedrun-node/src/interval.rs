//! Interval jobs: run a job's pipeline on a fixed period.

use crate::delegate::{Delegate, Service, ServiceError};
use crate::kv::KvStore;
use crate::store::JobStore;
use async_trait::async_trait;
use feedrun_core::{JobId, JobSpec, JobType};
use feedrun_pipeline::{Runner, TaskGraph};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// KV key holding the id of a job's most recent run.
pub const LAST_RUN_ID_KEY: &str = "last_run_id";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IntervalConfig {
    #[serde(default)]
    interval_secs: Option<u64>,
}

/// Delegate for the `interval` job type.
pub struct IntervalDelegate {
    runner: Runner,
    store: Arc<dyn JobStore>,
    default_interval: Duration,
}

impl IntervalDelegate {
    pub fn new(runner: Runner, store: Arc<dyn JobStore>, default_interval: Duration) -> Self {
        Self {
            runner,
            store,
            default_interval,
        }
    }

    /// Run period from the job config, falling back to the node default.
    fn interval_for(&self, spec: &JobSpec) -> Result<Duration, ServiceError> {
        let config: IntervalConfig = if spec.config.is_null() {
            IntervalConfig::default()
        } else {
            serde_json::from_value(spec.config.clone())
                .map_err(|e| ServiceError::InvalidConfig(e.to_string()))?
        };
        match config.interval_secs {
            None => Ok(self.default_interval),
            Some(0) => Err(ServiceError::InvalidConfig(
                "interval_secs must be positive".into(),
            )),
            Some(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}

#[async_trait]
impl Delegate for IntervalDelegate {
    fn job_type(&self) -> JobType {
        JobType::interval()
    }

    async fn services_for_spec(&self, spec: &JobSpec) -> Result<Vec<Box<dyn Service>>, ServiceError> {
        let interval = self.interval_for(spec)?;
        let graph = TaskGraph::parse(&spec.pipeline_spec)?;
        graph.resolve()?;

        Ok(vec![Box::new(PipelineService {
            job_id: spec.id,
            interval,
            worker: Arc::new(PipelineWorker {
                job_id: spec.id,
                graph,
                runner: self.runner.clone(),
                store: self.store.clone(),
                kv: self.store.kv_store(spec.id),
            }),
            cancel: CancellationToken::new(),
            handle: None,
        })])
    }
}

/// Runs one job's graph every `interval` until stopped.
pub struct PipelineService {
    job_id: JobId,
    interval: Duration,
    worker: Arc<PipelineWorker>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct PipelineWorker {
    job_id: JobId,
    graph: TaskGraph,
    runner: Runner,
    store: Arc<dyn JobStore>,
    kv: Arc<dyn KvStore>,
}

impl PipelineWorker {
    async fn run_once(&self) {
        match self
            .runner
            .execute_and_insert_finished_run(Some(self.job_id), &self.graph)
            .await
        {
            Ok(run) => {
                if let Err(e) = self.kv.store(LAST_RUN_ID_KEY, &run.id).await {
                    warn!(job_id = %self.job_id, error = %e, "Failed to store last run id");
                }
            }
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Pipeline run failed");
                if let Err(record_err) = self.store.record_error(self.job_id, &e.to_string()).await {
                    warn!(job_id = %self.job_id, error = %record_err, "Failed to record job error");
                }
            }
        }
    }
}

#[async_trait]
impl Service for PipelineService {
    async fn start(&mut self) -> Result<(), ServiceError> {
        if self.handle.is_some() {
            return Err(ServiceError::Start(format!(
                "pipeline service for job {} already running",
                self.job_id
            )));
        }

        let worker = self.worker.clone();
        let cancel = self.cancel.clone();
        let period = self.interval;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => worker.run_once().await,
                }
            }
            debug!(job_id = %worker.job_id, "Pipeline service loop exited");
        }));

        info!(job_id = %self.job_id, interval_secs = self.interval.as_secs_f64(), "Started pipeline service");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServiceError> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| ServiceError::Stop(e.to_string()))?;
        }
        info!(job_id = %self.job_id, "Stopped pipeline service");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDatabase, StoreError};
    use feedrun_core::{NewJob, RunId};
    use feedrun_pipeline::{
        HttpTransport, MemoryRunStore, RunStore, StaticBridgeRegistry, TaskContext,
        TransportConfig,
    };

    fn delegate(store: Arc<dyn JobStore>) -> (IntervalDelegate, Arc<MemoryRunStore>) {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        let ctx = TaskContext::new(Arc::new(transport), Arc::new(StaticBridgeRegistry::new()));
        let runs = Arc::new(MemoryRunStore::new());
        let runner = Runner::new(ctx, runs.clone());
        (
            IntervalDelegate::new(runner, store, Duration::from_secs(60)),
            runs,
        )
    }

    fn job(config: serde_json::Value) -> NewJob {
        NewJob::new(JobType::interval(), "a [type=median]").with_config(config)
    }

    #[tokio::test]
    async fn test_interval_from_config() {
        let db = MemoryDatabase::new();
        let store = Arc::new(db.session());
        let (delegate, _) = delegate(store.clone());

        let spec = store.create_job(job(serde_json::Value::Null)).await.unwrap();
        assert_eq!(delegate.interval_for(&spec).unwrap(), Duration::from_secs(60));

        let spec = store
            .create_job(job(serde_json::json!({"interval_secs": 5})))
            .await
            .unwrap();
        assert_eq!(delegate.interval_for(&spec).unwrap(), Duration::from_secs(5));

        let spec = store
            .create_job(job(serde_json::json!({"interval_secs": 0})))
            .await
            .unwrap();
        assert!(matches!(
            delegate.interval_for(&spec),
            Err(ServiceError::InvalidConfig(_))
        ));

        let spec = store
            .create_job(job(serde_json::json!({"every": 5})))
            .await
            .unwrap();
        assert!(matches!(
            delegate.interval_for(&spec),
            Err(ServiceError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_graph_rejected() {
        let db = MemoryDatabase::new();
        let store = Arc::new(db.session());
        let (delegate, _) = delegate(store.clone());
        let spec = store
            .create_job(NewJob::new(JobType::interval(), "a [type=teleport]"))
            .await
            .unwrap();
        assert!(matches!(
            delegate.services_for_spec(&spec).await,
            Err(ServiceError::Graph(_))
        ));
    }

    #[tokio::test]
    async fn test_service_runs_and_records_last_run() {
        let db = MemoryDatabase::new();
        let store = Arc::new(db.session());
        let (delegate, runs) = delegate(store.clone());
        let spec = store
            .create_job(job(serde_json::json!({"interval_secs": 1})))
            .await
            .unwrap();

        let mut services = delegate.services_for_spec(&spec).await.unwrap();
        assert_eq!(services.len(), 1);
        let service = &mut services[0];
        service.start().await.unwrap();
        assert!(matches!(service.start().await, Err(ServiceError::Start(_))));

        // the first tick fires immediately
        let kv = store.kv_store(spec.id);
        let mut last: Option<RunId> = None;
        for _ in 0..200 {
            last = kv.get(LAST_RUN_ID_KEY).await.unwrap();
            if last.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.stop().await.unwrap();

        let run = runs.find_run(&last.unwrap()).await.unwrap();
        assert_eq!(run.job_id, Some(spec.id));
        // a median with no inputs errors, which is a task error, not a spec error
        assert!(run.has_errors());
        assert!(store.spec_errors(spec.id).await.unwrap().is_empty());

        // nothing runs after stop
        let count = runs.len().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.len().await, count);
    }

    #[tokio::test]
    async fn test_last_run_id_needs_job() {
        let db = MemoryDatabase::new();
        let store = db.session();
        let kv = store.kv_store(JobId::new(42));
        assert!(matches!(
            kv.store(LAST_RUN_ID_KEY, "x").await,
            Err(StoreError::JobNotFound(_))
        ));
    }
}
