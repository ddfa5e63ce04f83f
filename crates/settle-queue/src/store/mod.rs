//! The shared job store: one record per id plus two time-ordered indexes.
//!
//! ```text
//!   put ──► record{payload,due,retries} + due[id]=due
//!   claim_due_batch:  due[id] (score <= now) ──► processing[id]=(now+visibility, token)
//!   requeue_expired:  processing[id] (deadline <= now) ──► due[id]=now
//!   ack / reschedule / retry:  processing[id] (same token) ──► gone | due[id]
//! ```
//!
//! Every operation that touches more than one of {record, due, processing}
//! is atomic as a unit. Index ties on equal scores are broken by id.
//!
//! A claim can outlive its holder's interest in it: the reaper may hand it
//! back and another worker may claim the id again while the first is still
//! inside its sink. The token keeps the first worker from resolving the
//! second worker's claim.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::types::{Claim, JobRecord, JobState, QueueDepth};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write or overwrite the record for `id` and set its due-index score.
    ///
    /// Retries are preserved, any retention deadline is cleared, and the
    /// processing index is left alone if `id` is currently claimed.
    async fn put(&self, id: &str, payload: &str, due: i64) -> Result<()>;

    /// Current record, or `None` if it never existed or its retention elapsed.
    async fn get(&self, id: &str, now: i64) -> Result<Option<JobRecord>>;

    /// Schedule removal of the record at `now + ttl_ms`.
    ///
    /// Skipped while `id` sits in either index: a newer enqueue landed after
    /// the claim (or has already been claimed again) and its record must
    /// outlive this acknowledgement.
    async fn set_retention(&self, id: &str, ttl_ms: i64, now: i64) -> Result<()>;

    /// Move up to `batch_size` ready ids from due to processing, earliest first.
    ///
    /// Each moved id gets the deadline `now + visibility_ms` and a fresh
    /// claim token. An id is returned by at most one concurrent caller.
    async fn claim_due_batch(
        &self,
        now: i64,
        batch_size: usize,
        visibility_ms: i64,
    ) -> Result<Vec<Claim>>;

    /// Move up to `batch_size` processing ids whose deadline is <= now back
    /// to due with score `now`.
    async fn requeue_expired(&self, now: i64, batch_size: usize) -> Result<Vec<String>>;

    /// Remove `id` from processing if it is still held under `token`.
    /// Returns whether it was.
    async fn ack(&self, id: &str, token: &str) -> Result<bool>;

    /// Put `id` back in due at `due` and drop it from processing, if it is
    /// still held under `token`. Returns whether it was.
    async fn reschedule(&self, id: &str, due: i64, token: &str) -> Result<bool>;

    /// [`reschedule`](Self::reschedule) plus one more on the retry counter.
    ///
    /// Returns the new retry count, or `None` if the claim is no longer held
    /// under `token` (nothing is changed then). A held claim whose record is
    /// gone is `JobNotFound`.
    async fn retry(&self, id: &str, due: i64, token: &str) -> Result<Option<u32>>;

    /// Hard-delete records whose retention deadline is <= now.
    async fn purge_expired(&self, now: i64) -> Result<usize>;

    async fn depth(&self, now: i64) -> Result<QueueDepth>;

    /// Which index `id` sits in. A claimed id that was re-enqueued reports
    /// `Claimed` until the worker resolves the claim.
    async fn state(&self, id: &str, now: i64) -> Result<Option<JobState>>;
}

pub(crate) fn new_claim_token() -> String {
    Uuid::now_v7().to_string()
}

pub(crate) fn ensure_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(QueueError::InvalidArgument(
            "job id must not be empty".to_string(),
        ));
    }
    Ok(())
}
