//! Node configuration.

use feedrun_pipeline::TransportConfig;
use std::time::Duration;

/// Advisory lock namespace used for job claims.
pub const DEFAULT_LOCK_CLASS: i32 = 1027;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How often the spawner sweeps for unclaimed and deleted jobs.
    pub poll_interval: Duration,

    /// Advisory lock class id shared by every node of a deployment.
    pub lock_class: i32,

    /// Run interval for interval jobs that do not set one.
    pub default_run_interval: Duration,

    /// How long finished runs are kept.
    pub run_retention: Duration,

    /// How often old runs are pruned.
    pub prune_interval: Duration,

    /// HTTP transport settings for fetch tasks.
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            lock_class: DEFAULT_LOCK_CLASS,
            default_run_interval: Duration::from_secs(60),
            run_retention: Duration::from_secs(24 * 60 * 60),
            prune_interval: Duration::from_secs(10 * 60),
            transport: TransportConfig::default(),
        }
    }
}
