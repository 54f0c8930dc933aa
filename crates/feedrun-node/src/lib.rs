//! feedrun Node Library
//!
//! This crate provides the node side of feedrun: the job store port and its
//! in-memory backend, per-job key/value storage, the spawner that claims
//! jobs across nodes and runs their services, and pruning of old runs.

pub mod config;
pub mod delegate;
pub mod interval;
pub mod kv;
pub mod pruner;
pub mod spawner;
pub mod store;

pub use config::{NodeConfig, DEFAULT_LOCK_CLASS};
pub use delegate::{Delegate, Service, ServiceError};
pub use interval::{IntervalDelegate, PipelineService, LAST_RUN_ID_KEY};
pub use kv::KvStore;
pub use pruner::RunPruner;
pub use spawner::{Spawner, SpawnerError};
pub use store::{JobStore, MemoryDatabase, MemoryJobStore, StoreError};
