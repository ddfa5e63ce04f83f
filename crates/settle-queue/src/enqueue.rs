use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use settle_core::Clock;
use tracing::debug;

use crate::error::Result;
use crate::store::JobStore;

/// Front door for callers: every call pushes the job's deadline to
/// `now + delay`, so a burst of calls for one id collapses into a single run
/// after the last one.
///
/// There is no ceiling on total deferral; an id that keeps getting enqueued
/// faster than its delay never becomes due.
#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Serialize `payload` to JSON and (re)schedule `id`. Returns the due time.
    pub async fn enqueue_debounced<T>(&self, id: &str, payload: &T, delay: Duration) -> Result<i64>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_string(payload)?;
        self.enqueue_raw(id, &data, delay).await
    }

    /// Like [`enqueue_debounced`](Self::enqueue_debounced) for an already
    /// encoded JSON payload. The text is stored as-is.
    pub async fn enqueue_raw(&self, id: &str, payload: &str, delay: Duration) -> Result<i64> {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let due = self.clock.now_ms().saturating_add(delay_ms);
        self.store.put(id, payload, due).await?;
        debug!(job_id = %id, due, delay_ms, "job debounced");
        Ok(due)
    }
}
