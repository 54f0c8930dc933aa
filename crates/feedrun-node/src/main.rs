//! feedrun node.
//!
//! Runs the job spawner over an in-memory job store, loading jobs from a
//! JSON file at startup. Finished runs are kept for `--run-retention-secs`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use feedrun_core::NewJob;
use feedrun_node::{
    IntervalDelegate, JobStore, MemoryDatabase, NodeConfig, RunPruner, Service, Spawner,
};
use feedrun_pipeline::{
    HttpTransport, MemoryRunStore, RunStore, Runner, StaticBridgeRegistry, TaskContext,
    TransportConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// feedrun node: claims jobs and runs their pipelines.
#[derive(Parser, Debug)]
#[command(name = "feedrun-node", about = "feedrun job spawner and pipeline runner")]
struct Args {
    /// Seconds between sweeps for unclaimed and deleted jobs
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Advisory lock class shared by every node of a deployment
    #[arg(long, default_value_t = feedrun_node::DEFAULT_LOCK_CLASS)]
    lock_class: i32,

    /// Default run interval for interval jobs, in seconds
    #[arg(long, default_value = "60")]
    run_interval_secs: u64,

    /// How long finished runs are kept, in seconds
    #[arg(long, default_value = "86400")]
    run_retention_secs: u64,

    /// Seconds between prunes of old runs
    #[arg(long, default_value = "600")]
    prune_interval_secs: u64,

    /// Per-attempt HTTP timeout in seconds
    #[arg(long, default_value = "15")]
    http_timeout_secs: u64,

    /// HTTP attempts per request, including the first
    #[arg(long, default_value = "5")]
    http_max_attempts: u32,

    /// Maximum HTTP response size in bytes
    #[arg(long, default_value = "32768")]
    http_size_limit: usize,

    /// Allow fetch tasks to reach private and loopback addresses
    #[arg(long)]
    allow_unrestricted_network_access: bool,

    /// External adapter, as NAME=URL (repeatable)
    #[arg(long = "bridge")]
    bridges: Vec<String>,

    /// JSON file holding an array of jobs to create at startup
    #[arg(long)]
    jobs: Option<String>,
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            lock_class: self.lock_class,
            default_run_interval: Duration::from_secs(self.run_interval_secs),
            run_retention: Duration::from_secs(self.run_retention_secs),
            prune_interval: Duration::from_secs(self.prune_interval_secs),
            transport: TransportConfig {
                timeout: Duration::from_secs(self.http_timeout_secs),
                max_attempts: self.http_max_attempts,
                size_limit: self.http_size_limit,
                allow_unrestricted_network_access: self.allow_unrestricted_network_access,
                ..TransportConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("feedrun_node=info,feedrun_pipeline=info")),
        )
        .with_target(true)
        .init();

    let config = args.node_config();

    let mut bridges = StaticBridgeRegistry::new();
    for pair in &args.bridges {
        bridges.insert_pair(pair)?;
    }

    let transport = HttpTransport::new(config.transport.clone())?;
    let ctx = TaskContext::new(Arc::new(transport), Arc::new(bridges));
    let runs: Arc<dyn RunStore> = Arc::new(MemoryRunStore::new());
    let runner = Runner::new(ctx, runs.clone());
    let mut pruner = RunPruner::new(runs, config.run_retention, config.prune_interval)?;

    let db = MemoryDatabase::new();
    let store: Arc<dyn JobStore> = Arc::new(db.session());

    let spawner = Spawner::new(store.clone(), &config).with_delegate(Arc::new(
        IntervalDelegate::new(runner, store.clone(), config.default_run_interval),
    ));

    info!(
        lock_class = config.lock_class,
        bridges = args.bridges.len(),
        unrestricted = config.transport.allow_unrestricted_network_access,
        "Starting feedrun node"
    );
    spawner.start().await?;
    pruner.start().await?;

    if let Some(path) = &args.jobs {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read jobs from '{path}': {e}"))?;
        let jobs: Vec<NewJob> = serde_json::from_str(&raw)?;
        for job in jobs {
            if let Err(e) = spawner.create_job(job).await {
                error!(path = %path, error = %e, "Failed to create job");
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    spawner.stop().await;
    if let Err(e) = pruner.stop().await {
        error!(error = %e, "Failed to stop run pruner");
    }

    info!("feedrun node stopped");
    Ok(())
}
