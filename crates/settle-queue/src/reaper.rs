use std::sync::Arc;

use settle_core::{Clock, QueueConfig};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::store::JobStore;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids moved from processing back to due.
    pub requeued: Vec<String>,
    /// Completed records deleted after their retention window.
    pub purged: usize,
}

/// Periodic sweep that hands abandoned claims back out.
///
/// A claim whose visibility deadline has passed belongs to a worker that
/// crashed, hung, or is just slow; the reaper makes it due immediately.
/// Claims still inside their window are never touched, so the reaper needs no
/// coordination with running workers.
pub struct Reaper {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, config: QueueConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Requeue expired claims, then purge records past retention.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now_ms();
        let requeued = self
            .store
            .requeue_expired(now, self.config.reaper_batch_size)
            .await?;
        if !requeued.is_empty() {
            warn!(count = requeued.len(), ids = ?requeued, "requeued expired claims");
        }

        let purged = self.store.purge_expired(now).await?;
        if purged > 0 {
            debug!(count = purged, "purged retained job records");
        }
        Ok(SweepReport { requeued, purged })
    }

    /// Sweep every `reaper_interval_ms` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.reaper_interval_ms,
            "reaper started"
        );
        let mut interval = tokio::time::interval(self.config.reaper_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("reaper sweep error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("reaper shutting down");
    }
}
