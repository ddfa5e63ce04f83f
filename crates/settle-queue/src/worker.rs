//! The dispatch loop.
//!
//! Per claimed id:
//!
//! ```text
//!   reload record ──► gone?            ack, drop
//!                 ──► due > now?       stale claim: back to due at record.due
//!                 ──► bad payload?     ack + retention, drop
//!                 ──► sink(id,payload) ok:  ack + retention
//!                                      err: due = now + retry_backoff, retries += 1
//! ```
//!
//! Every resolution goes through the claim token, and retention is only set
//! after this worker's own ack went through.
//!
//! Delivery is at-least-once: a slow worker can lose its claim to the reaper
//! and the job is dispatched again elsewhere, so sinks must be idempotent.
//! Shutdown is checked before each claim and between jobs, never between a
//! sink call and the store write that resolves it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use settle_core::{Clock, QueueConfig};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::JobStore;
use crate::types::{BatchOutcome, Claim, DispatchedJob};

/// The side effect a due job triggers, supplied by the embedding application.
///
/// Returning `Err` reschedules the job after the configured backoff; it is
/// retried without limit.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn handle(&self, job: DispatchedJob) -> anyhow::Result<()>;
}

enum Disposition {
    Dispatched,
    Stale,
    Failed,
    Dropped,
    Lost,
}

pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn JobSink>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn JobSink>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            store,
            sink,
            clock,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim one batch and work through it.
    pub async fn run_once(&self) -> Result<BatchOutcome> {
        self.cycle(None).await
    }

    /// Claim-and-dispatch until `shutdown` broadcasts `true`.
    ///
    /// Store errors never end the loop: the worker waits
    /// `store_error_backoff_ms`, doubling up to `store_error_backoff_max_ms`,
    /// and tries again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "worker started");
        let mut error_backoff = self.config.store_error_backoff();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.cycle(Some(&shutdown)).await {
                Ok(outcome) => {
                    error_backoff = self.config.store_error_backoff();
                    if outcome.is_empty() {
                        Some(self.config.idle_interval())
                    } else {
                        debug!(worker_id = %self.id, ?outcome, "batch finished");
                        None
                    }
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(worker_id = %self.id, backoff_ms = error_backoff.as_millis() as u64, "store unavailable: {e}");
                    } else {
                        error!(worker_id = %self.id, backoff_ms = error_backoff.as_millis() as u64, "worker cycle failed: {e}");
                    }
                    let wait = error_backoff;
                    error_backoff = next_backoff(error_backoff, self.config.store_error_backoff_max());
                    Some(wait)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }
        info!(worker_id = %self.id, "worker shutting down");
    }

    async fn cycle(&self, shutdown: Option<&watch::Receiver<bool>>) -> Result<BatchOutcome> {
        let now = self.clock.now_ms();
        let claims = self
            .store
            .claim_due_batch(
                now,
                self.config.batch_size,
                self.config.visibility_timeout_i64(),
            )
            .await?;

        let mut outcome = BatchOutcome {
            claimed: claims.len(),
            ..BatchOutcome::default()
        };

        for (done, claim) in claims.iter().enumerate() {
            if is_cancelled(shutdown) {
                // The reaper hands these back once their visibility window ends.
                info!(
                    worker_id = %self.id,
                    abandoned = claims.len() - done,
                    "shutdown requested mid-batch"
                );
                break;
            }
            match self.process(claim).await? {
                Disposition::Dispatched => outcome.dispatched += 1,
                Disposition::Stale => outcome.stale += 1,
                Disposition::Failed => outcome.failed += 1,
                Disposition::Dropped => outcome.dropped += 1,
                Disposition::Lost => outcome.lost += 1,
            }
        }
        Ok(outcome)
    }

    #[instrument(skip(self, claim), fields(worker_id = %self.id, job_id = %claim.id))]
    async fn process(&self, claim: &Claim) -> Result<Disposition> {
        let id = claim.id.as_str();
        let token = claim.token.as_str();
        let now = self.clock.now_ms();
        let Some(record) = self.store.get(id, now).await? else {
            warn!("claimed job has no record; releasing claim");
            self.store.ack(id, token).await?;
            return Ok(Disposition::Dropped);
        };

        if record.due > now {
            // Re-enqueued after the claim: the debounce window moved.
            if !self.store.reschedule(id, record.due, token).await? {
                return Ok(self.lost());
            }
            debug!(due = record.due, "stale claim rescheduled");
            return Ok(Disposition::Stale);
        }

        let payload: serde_json::Value = match serde_json::from_str(&record.payload) {
            Ok(v) => v,
            Err(e) => {
                error!("undecodable payload, dropping claim: {e}");
                if !self.store.ack(id, token).await? {
                    return Ok(self.lost());
                }
                self.store
                    .set_retention(id, self.config.retention_ttl_ms(), now)
                    .await?;
                return Ok(Disposition::Dropped);
            }
        };

        let job = DispatchedJob {
            id: id.to_string(),
            payload,
            retries: record.retries,
        };

        match self.sink.handle(job).await {
            Ok(()) => {
                if !self.store.ack(id, token).await? {
                    return Ok(self.lost());
                }
                self.store
                    .set_retention(id, self.config.retention_ttl_ms(), self.clock.now_ms())
                    .await?;
                info!(retries = record.retries, "job dispatched");
                Ok(Disposition::Dispatched)
            }
            Err(e) => {
                let next_due = now.saturating_add(self.config.retry_backoff_i64());
                let Some(retries) = self.store.retry(id, next_due, token).await? else {
                    return Ok(self.lost());
                };
                warn!(retries, next_due, "sink failed, rescheduled: {e:#}");
                Ok(Disposition::Failed)
            }
        }
    }

    fn lost(&self) -> Disposition {
        warn!("claim was taken over before it could be resolved; leaving it to the new holder");
        Disposition::Lost
    }
}

fn is_cancelled(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow())
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
