//! Periodic pruning of finished runs.

use crate::delegate::{Service, ServiceError};
use async_trait::async_trait;
use chrono::Utc;
use feedrun_pipeline::RunStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deletes runs older than `retention` every `period`.
pub struct RunPruner {
    store: Arc<dyn RunStore>,
    retention: chrono::Duration,
    period: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RunPruner {
    pub fn new(
        store: Arc<dyn RunStore>,
        retention: Duration,
        period: Duration,
    ) -> Result<Self, ServiceError> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| ServiceError::InvalidConfig(format!("run retention: {e}")))?;
        if period.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "prune interval must be positive".into(),
            ));
        }
        Ok(Self {
            store,
            retention,
            period,
            cancel: CancellationToken::new(),
            handle: None,
        })
    }

    /// Prune once; returns how many runs were removed.
    pub async fn prune_once(&self) -> usize {
        prune(self.store.as_ref(), self.retention).await
    }
}

async fn prune(store: &dyn RunStore, retention: chrono::Duration) -> usize {
    let cutoff = Utc::now() - retention;
    match store.prune_before(cutoff).await {
        Ok(0) => 0,
        Ok(removed) => {
            info!(removed, cutoff = %cutoff, "Pruned old runs");
            removed
        }
        Err(e) => {
            warn!(error = %e, "Failed to prune runs");
            0
        }
    }
}

#[async_trait]
impl Service for RunPruner {
    async fn start(&mut self) -> Result<(), ServiceError> {
        if self.handle.is_some() {
            return Err(ServiceError::Start("run pruner already running".into()));
        }

        let store = self.store.clone();
        let retention = self.retention;
        let cancel = self.cancel.clone();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        prune(store.as_ref(), retention).await;
                    }
                }
            }
            debug!("Run pruner loop exited");
        }));

        info!(
            retention_secs = self.retention.num_seconds(),
            period_secs = self.period.as_secs_f64(),
            "Started run pruner"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ServiceError> {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| ServiceError::Stop(e.to_string()))?;
        }
        Ok(())
    }
}
