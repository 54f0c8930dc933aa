//! In-memory job store backend.
//!
//! A [`MemoryDatabase`] is shared by any number of sessions
//! ([`MemoryJobStore`]), one per node. Advisory locks belong to the session
//! that took them, like session-level locks in a SQL database.

use super::{JobStore, StoreError};
use crate::kv::KvStore;
use async_trait::async_trait;
use feedrun_core::{JobId, JobSpec, NewJob, SpecError, SpecErrorId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

type SessionId = u64;

#[derive(Debug, Default)]
struct Tables {
    next_job_id: i32,
    next_error_id: i64,
    next_session_id: SessionId,
    jobs: BTreeMap<JobId, JobSpec>,
    spec_errors: BTreeMap<SpecErrorId, SpecError>,
    kv: HashMap<JobId, HashMap<String, serde_json::Value>>,
    locks: HashMap<(i32, JobId), SessionId>,
}

/// Shared in-memory database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a new session.
    pub fn session(self: &Arc<Self>) -> MemoryJobStore {
        let id = {
            let mut tables = self.tables();
            tables.next_session_id += 1;
            tables.next_session_id
        };
        debug!(session = id, "Opened store session");
        MemoryJobStore {
            db: self.clone(),
            session: id,
            closed: AtomicBool::new(false),
        }
    }

    /// Session currently holding a lock, if any.
    pub fn lock_holder(&self, lock_class: i32, id: JobId) -> Option<u64> {
        self.tables().locks.get(&(lock_class, id)).copied()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        // The tables stay consistent across a panic in another holder.
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_session(&self, session: SessionId) -> usize {
        let mut tables = self.tables();
        let before = tables.locks.len();
        tables.locks.retain(|_, holder| *holder != session);
        before - tables.locks.len()
    }
}

/// One node's session on a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryJobStore {
    db: Arc<MemoryDatabase>,
    session: SessionId,
    closed: AtomicBool,
}

impl MemoryJobStore {
    pub fn session_id(&self) -> u64 {
        self.session
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    /// Close the session, releasing its advisory locks.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let released = self.db.release_session(self.session);
            info!(session = self.session, released, "Closed store session");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for MemoryJobStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn unclaimed_jobs(&self, exclude: &[JobId]) -> Result<Vec<JobSpec>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .db
            .tables()
            .jobs
            .values()
            .filter(|job| !exclude.contains(&job.id))
            .cloned()
            .collect())
    }

    async fn create_job(&self, job: NewJob) -> Result<JobSpec, StoreError> {
        self.ensure_open()?;
        let mut tables = self.db.tables();
        tables.next_job_id += 1;
        let spec = JobSpec::from_new(JobId::new(tables.next_job_id), job);
        tables.jobs.insert(spec.id, spec.clone());
        Ok(spec)
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut tables = self.db.tables();
        tables.jobs.remove(&id).ok_or(StoreError::JobNotFound(id))?;
        tables.spec_errors.retain(|_, err| err.job_id != id);
        tables.kv.remove(&id);
        Ok(())
    }

    async fn check_for_deleted_jobs(&self, ids: &[JobId]) -> Result<Vec<JobId>, StoreError> {
        self.ensure_open()?;
        let tables = self.db.tables();
        Ok(ids
            .iter()
            .copied()
            .filter(|id| !tables.jobs.contains_key(id))
            .collect())
    }

    async fn record_error(&self, job_id: JobId, description: &str) -> Result<SpecError, StoreError> {
        self.ensure_open()?;
        let mut tables = self.db.tables();
        if !tables.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        if let Some(existing) = tables
            .spec_errors
            .values_mut()
            .find(|e| e.job_id == job_id && e.description == description)
        {
            existing.bump();
            return Ok(existing.clone());
        }
        tables.next_error_id += 1;
        let err = SpecError::new(SpecErrorId::new(tables.next_error_id), job_id, description);
        tables.spec_errors.insert(err.id, err.clone());
        Ok(err)
    }

    async fn find_job(&self, id: JobId) -> Result<JobSpec, StoreError> {
        self.ensure_open()?;
        self.db
            .tables()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::JobNotFound(id))
    }

    async fn jobs(&self) -> Result<Vec<JobSpec>, StoreError> {
        self.ensure_open()?;
        Ok(self.db.tables().jobs.values().cloned().collect())
    }

    async fn spec_errors(&self, job_id: JobId) -> Result<Vec<SpecError>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .db
            .tables()
            .spec_errors
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_spec_error(&self, id: SpecErrorId) -> Result<SpecError, StoreError> {
        self.ensure_open()?;
        self.db
            .tables()
            .spec_errors
            .get(&id)
            .cloned()
            .ok_or(StoreError::SpecErrorNotFound(id))
    }

    async fn dismiss_error(&self, id: SpecErrorId) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.db
            .tables()
            .spec_errors
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::SpecErrorNotFound(id))
    }

    async fn try_advisory_lock(&self, lock_class: i32, id: JobId) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let mut tables = self.db.tables();
        let holder = tables.locks.entry((lock_class, id)).or_insert(self.session);
        Ok(*holder == self.session)
    }

    async fn advisory_unlock(&self, lock_class: i32, id: JobId) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut tables = self.db.tables();
        if tables.locks.get(&(lock_class, id)) == Some(&self.session) {
            tables.locks.remove(&(lock_class, id));
        }
        Ok(())
    }

    fn kv_store(&self, job_id: JobId) -> Arc<dyn KvStore> {
        Arc::new(MemoryKvStore {
            db: self.db.clone(),
            job_id,
        })
    }
}

/// Key/value entries of one job in a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryKvStore {
    db: Arc<MemoryDatabase>,
    job_id: JobId,
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn store_value(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut tables = self.db.tables();
        if !tables.jobs.contains_key(&self.job_id) {
            return Err(StoreError::JobNotFound(self.job_id));
        }
        tables
            .kv
            .entry(self.job_id)
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .db
            .tables()
            .kv
            .get(&self.job_id)
            .and_then(|entries| entries.get(key))
            .cloned())
    }
}
