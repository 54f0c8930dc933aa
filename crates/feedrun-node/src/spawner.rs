//! Job spawner: claims jobs across the cluster and runs their services.
//!
//! One coordinating task owns every change to the claimed set. It wakes on
//! shutdown, on delete requests, on a fixed ticker, and when a job is
//! created locally.

use crate::config::NodeConfig;
use crate::delegate::{Delegate, Service, ServiceError};
use crate::store::{JobStore, StoreError};
use feedrun_core::{ClaimState, CoreError, JobId, JobSpec, JobType, NewJob};
use feedrun_pipeline::{GraphError, TaskGraph};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Spawner errors.
#[derive(Debug, Error)]
pub enum SpawnerError {
    #[error("Spawner already started")]
    AlreadyStarted,

    #[error("Spawner loop is not running")]
    NotRunning,

    #[error("No delegate registered for job type '{0}'")]
    NoDelegate(JobType),

    #[error("Invalid job: {0}")]
    InvalidJob(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    State(#[from] CoreError),
}

/// A job owned by this node.
struct ClaimedJob {
    spec: JobSpec,
    state: ClaimState,
    services: Vec<Box<dyn Service>>,
}

struct DeleteRequest {
    job_id: JobId,
    reply: oneshot::Sender<Result<(), SpawnerError>>,
}

/// State shared between the public handle and the coordinating task.
struct SpawnerCore {
    store: Arc<dyn JobStore>,
    delegates: HashMap<JobType, Arc<dyn Delegate>>,
    lock_class: i32,
    claimed: Mutex<HashMap<JobId, ClaimedJob>>,
}

/// Claims jobs and manages their services.
pub struct Spawner {
    core: Arc<SpawnerCore>,
    poll_interval: Duration,
    delete_tx: mpsc::Sender<DeleteRequest>,
    delete_rx: Mutex<Option<mpsc::Receiver<DeleteRequest>>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Spawner {
    pub fn new(store: Arc<dyn JobStore>, config: &NodeConfig) -> Self {
        let (delete_tx, delete_rx) = mpsc::channel(32);
        Self {
            core: Arc::new(SpawnerCore {
                store,
                delegates: HashMap::new(),
                lock_class: config.lock_class,
                claimed: Mutex::new(HashMap::new()),
            }),
            poll_interval: config.poll_interval,
            delete_tx,
            delete_rx: Mutex::new(Some(delete_rx)),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Builder method to register a delegate. Must be called before `start`.
    pub fn with_delegate(mut self, delegate: Arc<dyn Delegate>) -> Self {
        let job_type = delegate.job_type();
        match Arc::get_mut(&mut self.core) {
            Some(core) => {
                core.delegates.insert(job_type, delegate);
            }
            None => warn!(job_type = %job_type, "Spawner already started, ignoring delegate"),
        }
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.core.store
    }

    /// Spawn the coordinating task. It sweeps for jobs immediately.
    pub async fn start(&self) -> Result<(), SpawnerError> {
        let delete_rx = self
            .delete_rx
            .lock()
            .await
            .take()
            .ok_or(SpawnerError::AlreadyStarted)?;

        info!(
            lock_class = self.core.lock_class,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            delegates = self.core.delegates.len(),
            "Starting job spawner"
        );
        let handle = tokio::spawn(run_loop(
            self.core.clone(),
            self.poll_interval,
            delete_rx,
            self.wake.clone(),
            self.shutdown.clone(),
        ));
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop every owned job and wait for the coordinating task to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Spawner loop panicked");
            }
        }
    }

    /// Validate and insert a job, then sweep right away.
    pub async fn create_job(&self, job: NewJob) -> Result<JobSpec, SpawnerError> {
        TaskGraph::parse(&job.pipeline_spec)?.resolve()?;
        let spec = self.core.store.create_job(job).await?;
        info!(job_id = %spec.id, job_type = %spec.job_type, name = %spec.display_name(), "Created job");
        self.wake.notify_one();
        Ok(spec)
    }

    /// Stop a job's services, release it, and delete it with its spec
    /// errors and KV entries.
    pub async fn delete_job(&self, job_id: JobId) -> Result<(), SpawnerError> {
        let running = self.handle.lock().await.is_some();
        if !running {
            return self.core.delete_job(job_id).await;
        }
        let (reply, response) = oneshot::channel();
        self.delete_tx
            .send(DeleteRequest { job_id, reply })
            .await
            .map_err(|_| SpawnerError::NotRunning)?;
        response.await.map_err(|_| SpawnerError::NotRunning)?
    }

    /// Ids of the jobs this node currently owns.
    pub async fn claimed_job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.core.claimed.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Claim state of a job on this node.
    pub async fn job_state(&self, job_id: JobId) -> ClaimState {
        self.core
            .claimed
            .lock()
            .await
            .get(&job_id)
            .map_or(ClaimState::Unclaimed, |job| job.state)
    }
}

async fn run_loop(
    core: Arc<SpawnerCore>,
    poll_interval: Duration,
    mut delete_rx: mpsc::Receiver<DeleteRequest>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(request) = delete_rx.recv() => {
                let result = core.delete_job(request.job_id).await;
                let _ = request.reply.send(result);
            }
            _ = ticker.tick() => {
                core.reconcile().await;
                core.claim_and_start().await;
            }
            _ = wake.notified() => {
                core.claim_and_start().await;
            }
        }
    }

    // Answer delete requests that raced with shutdown.
    delete_rx.close();
    while let Ok(request) = delete_rx.try_recv() {
        let _ = request.reply.send(Err(SpawnerError::NotRunning));
    }

    core.stop_all().await;
    info!("Job spawner stopped");
}

impl SpawnerCore {
    async fn claim_and_start(&self) {
        let mut claimed = self.claimed.lock().await;
        let exclude: Vec<JobId> = claimed.keys().copied().collect();
        let jobs = match self
            .store
            .claim_unclaimed_jobs(&exclude, self.lock_class)
            .await
        {
            Ok(jobs) => jobs,
            Err(StoreError::SessionClosed) => {
                self.abandon_all(&mut claimed).await;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim unclaimed jobs");
                return;
            }
        };

        for spec in jobs {
            let job_id = spec.id;
            match self.start_job(spec).await {
                Ok(job) => {
                    info!(job_id = %job_id, services = job.services.len(), "Started job");
                    claimed.insert(job_id, job);
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to start job");
                    self.unlock(job_id).await;
                    if let Err(record_err) = self.store.record_error(job_id, &e.to_string()).await {
                        warn!(job_id = %job_id, error = %record_err, "Failed to record job error");
                    }
                }
            }
        }
    }

    /// Build and start a job's services, in order. On failure the services
    /// already started are stopped again.
    async fn start_job(&self, spec: JobSpec) -> Result<ClaimedJob, SpawnerError> {
        let state = ClaimState::Unclaimed.transition(ClaimState::Claiming)?;
        let delegate = self
            .delegates
            .get(&spec.job_type)
            .ok_or_else(|| SpawnerError::NoDelegate(spec.job_type.clone()))?;
        let services = delegate.services_for_spec(&spec).await?;

        let mut started: Vec<Box<dyn Service>> = Vec::with_capacity(services.len());
        for mut service in services {
            if let Err(e) = service.start().await {
                stop_services(spec.id, &mut started).await;
                return Err(e.into());
            }
            started.push(service);
        }

        Ok(ClaimedJob {
            spec,
            state: state.transition(ClaimState::Running)?,
            services: started,
        })
    }

    /// Stop a job's services and move it to `outcome`. The lock is released
    /// only when `unlock` is set.
    async fn stop_job(&self, mut job: ClaimedJob, outcome: ClaimState, unlock: bool) {
        let job_id = job.spec.id;
        let state = job
            .state
            .transition(ClaimState::Stopping)
            .and_then(|s| s.transition(outcome));
        stop_services(job_id, &mut job.services).await;
        if unlock {
            self.unlock(job_id).await;
        }
        match state {
            Ok(state) => info!(job_id = %job_id, state = %state, "Stopped job"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Stopped job from unexpected state"),
        }
    }

    /// Stop jobs deleted by another node, and jobs whose lock this node no
    /// longer holds.
    async fn reconcile(&self) {
        let mut claimed = self.claimed.lock().await;
        if claimed.is_empty() {
            return;
        }
        let ids: Vec<JobId> = claimed.keys().copied().collect();
        let deleted = match self.store.check_for_deleted_jobs(&ids).await {
            Ok(deleted) => deleted,
            Err(StoreError::SessionClosed) => {
                self.abandon_all(&mut claimed).await;
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to check for deleted jobs");
                return;
            }
        };
        for job_id in &deleted {
            if let Some(job) = claimed.remove(job_id) {
                info!(job_id = %job_id, "Job was deleted elsewhere, stopping");
                self.stop_job(job, ClaimState::Deleted, true).await;
            }
        }

        // Re-taking a lock the session already holds is a no-op.
        for job_id in ids.into_iter().filter(|id| !deleted.contains(id)) {
            match self.store.try_advisory_lock(self.lock_class, job_id).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Some(job) = claimed.remove(&job_id) {
                        warn!(job_id = %job_id, "Lost job lock, stopping");
                        self.stop_job(job, ClaimState::Unclaimed, false).await;
                    }
                }
                Err(StoreError::SessionClosed) => {
                    self.abandon_all(&mut claimed).await;
                    return;
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to confirm job lock");
                }
            }
        }
    }

    /// Delete a job. Its services are stopped and the durable record is
    /// removed while the lock is still held, so no other node can claim it
    /// in between.
    async fn delete_job(&self, job_id: JobId) -> Result<(), SpawnerError> {
        let mut claimed = self.claimed.lock().await;
        let Some(mut job) = claimed.remove(&job_id) else {
            self.store.delete_job(job_id).await?;
            info!(job_id = %job_id, "Deleted job");
            return Ok(());
        };

        let stopping = match job.state.transition(ClaimState::Stopping) {
            Ok(state) => state,
            Err(e) => {
                claimed.insert(job_id, job);
                return Err(e.into());
            }
        };
        stop_services(job_id, &mut job.services).await;

        if let Err(e) = self.store.delete_job(job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to delete job, restarting it");
            match self.start_job(job.spec).await {
                Ok(restarted) => {
                    claimed.insert(job_id, restarted);
                }
                Err(start_err) => {
                    warn!(job_id = %job_id, error = %start_err, "Failed to restart job");
                    self.unlock(job_id).await;
                    if let Err(record_err) =
                        self.store.record_error(job_id, &start_err.to_string()).await
                    {
                        warn!(job_id = %job_id, error = %record_err, "Failed to record job error");
                    }
                }
            }
            return Err(e.into());
        }

        let state = stopping.transition(ClaimState::Deleted)?;
        self.unlock(job_id).await;
        info!(job_id = %job_id, state = %state, "Deleted job");
        Ok(())
    }

    async fn stop_all(&self) {
        let mut claimed = self.claimed.lock().await;
        let jobs: Vec<ClaimedJob> = claimed.drain().map(|(_, job)| job).collect();
        for job in jobs {
            self.stop_job(job, ClaimState::Unclaimed, true).await;
        }
    }

    /// The store session is gone and its locks with it: stop every job
    /// without touching the locks.
    async fn abandon_all(&self, claimed: &mut HashMap<JobId, ClaimedJob>) {
        if claimed.is_empty() {
            return;
        }
        warn!(jobs = claimed.len(), "Store session closed, stopping all jobs");
        let jobs: Vec<ClaimedJob> = claimed.drain().map(|(_, job)| job).collect();
        for job in jobs {
            self.stop_job(job, ClaimState::Unclaimed, false).await;
        }
    }

    async fn unlock(&self, job_id: JobId) {
        if let Err(e) = self.store.advisory_unlock(self.lock_class, job_id).await {
            warn!(job_id = %job_id, error = %e, "Failed to release job lock");
        }
    }
}

/// Stop services in reverse start order, logging failures.
async fn stop_services(job_id: JobId, services: &mut Vec<Box<dyn Service>>) {
    while let Some(mut service) = services.pop() {
        if let Err(e) = service.stop().await {
            warn!(job_id = %job_id, error = %e, "Failed to stop service");
        } else {
            debug!(job_id = %job_id, "Stopped service");
        }
    }
}
