use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ensure_id, new_claim_token, JobStore};
use crate::error::{QueueError, Result};
use crate::types::{Claim, JobRecord, JobState, QueueDepth};

/// In-process [`JobStore`] for tests and single-process embedding.
///
/// A single mutex guards the records and both indexes, so every operation is
/// trivially atomic. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    due: ScoreIndex,
    processing: ScoreIndex,
    /// Claim token per processing entry.
    tokens: HashMap<String, String>,
}

/// Sorted set keyed by `(score, id)` with an id -> score side table.
#[derive(Default)]
struct ScoreIndex {
    ordered: BTreeSet<(i64, String)>,
    scores: HashMap<String, i64>,
}

impl ScoreIndex {
    fn upsert(&mut self, id: &str, score: i64) {
        if let Some(old) = self.scores.insert(id.to_string(), score) {
            self.ordered.remove(&(old, id.to_string()));
        }
        self.ordered.insert((score, id.to_string()));
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.scores.remove(id) {
            Some(score) => self.ordered.remove(&(score, id.to_string())),
            None => false,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.scores.contains_key(id)
    }

    /// Lowest-scored ids with score <= `now`, up to `limit`.
    fn up_to(&self, now: i64, limit: usize) -> Vec<String> {
        self.ordered
            .iter()
            .take_while(|(score, _)| *score <= now)
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

impl Inner {
    fn live_record(&self, id: &str, now: i64) -> Option<&JobRecord> {
        self.records
            .get(id)
            .filter(|r| r.expires_at.map_or(true, |at| at > now))
    }

    fn holds_claim(&self, id: &str, token: &str) -> bool {
        self.tokens.get(id).is_some_and(|t| t == token)
    }

    fn release(&mut self, id: &str) {
        self.processing.remove(id);
        self.tokens.remove(id);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| QueueError::Unavailable("memory store lock poisoned".into()))
    }

    /// Score of `id` in the due index, if present.
    pub fn due_score(&self, id: &str) -> Option<i64> {
        self.inner.lock().ok()?.due.scores.get(id).copied()
    }

    /// Visibility deadline of `id` in the processing index, if present.
    pub fn processing_deadline(&self, id: &str) -> Option<i64> {
        self.inner.lock().ok()?.processing.scores.get(id).copied()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put(&self, id: &str, payload: &str, due: i64) -> Result<()> {
        ensure_id(id)?;
        let mut inner = self.lock()?;
        let record = inner
            .records
            .entry(id.to_string())
            .or_insert_with(|| JobRecord {
                id: id.to_string(),
                payload: String::new(),
                due,
                retries: 0,
                expires_at: None,
            });
        record.payload = payload.to_string();
        record.due = due;
        record.expires_at = None;
        inner.due.upsert(id, due);
        Ok(())
    }

    async fn get(&self, id: &str, now: i64) -> Result<Option<JobRecord>> {
        Ok(self.lock()?.live_record(id, now).cloned())
    }

    async fn set_retention(&self, id: &str, ttl_ms: i64, now: i64) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.due.contains(id) || inner.processing.contains(id) {
            return Ok(());
        }
        if let Some(record) = inner.records.get_mut(id) {
            record.expires_at = Some(now.saturating_add(ttl_ms));
        }
        Ok(())
    }

    async fn claim_due_batch(
        &self,
        now: i64,
        batch_size: usize,
        visibility_ms: i64,
    ) -> Result<Vec<Claim>> {
        let mut inner = self.lock()?;
        let deadline = now.saturating_add(visibility_ms);
        let token = new_claim_token();
        let ready = inner.due.up_to(now, batch_size);
        let mut claimed = Vec::with_capacity(ready.len());
        for id in ready {
            if inner.due.remove(&id) {
                inner.processing.upsert(&id, deadline);
                inner.tokens.insert(id.clone(), token.clone());
                claimed.push(Claim {
                    id,
                    token: token.clone(),
                    deadline,
                });
            }
        }
        Ok(claimed)
    }

    async fn requeue_expired(&self, now: i64, batch_size: usize) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        let expired = inner.processing.up_to(now, batch_size);
        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            if inner.processing.remove(&id) {
                inner.tokens.remove(&id);
                inner.due.upsert(&id, now);
                reclaimed.push(id);
            }
        }
        Ok(reclaimed)
    }

    async fn ack(&self, id: &str, token: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        if !inner.holds_claim(id, token) {
            return Ok(false);
        }
        inner.release(id);
        Ok(true)
    }

    async fn reschedule(&self, id: &str, due: i64, token: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        if !inner.holds_claim(id, token) {
            return Ok(false);
        }
        inner.due.upsert(id, due);
        inner.release(id);
        Ok(true)
    }

    async fn retry(&self, id: &str, due: i64, token: &str) -> Result<Option<u32>> {
        let mut inner = self.lock()?;
        if !inner.holds_claim(id, token) {
            return Ok(None);
        }
        let Some(record) = inner.records.get_mut(id) else {
            return Err(QueueError::JobNotFound { id: id.to_string() });
        };
        record.retries = record.retries.saturating_add(1);
        let retries = record.retries;
        inner.due.upsert(id, due);
        inner.release(id);
        Ok(Some(retries))
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.records.len();
        inner
            .records
            .retain(|_, r| r.expires_at.map_or(true, |at| at > now));
        Ok(before - inner.records.len())
    }

    async fn depth(&self, now: i64) -> Result<QueueDepth> {
        let inner = self.lock()?;
        Ok(QueueDepth {
            pending: inner.due.len(),
            ready: inner
                .due
                .ordered
                .iter()
                .take_while(|(score, _)| *score <= now)
                .count(),
            processing: inner.processing.len(),
            retained: inner
                .records
                .values()
                .filter(|r| r.expires_at.is_some_and(|at| at > now))
                .count(),
        })
    }

    async fn state(&self, id: &str, now: i64) -> Result<Option<JobState>> {
        let inner = self.lock()?;
        Ok(if inner.processing.contains(id) {
            Some(JobState::Claimed)
        } else if inner.due.contains(id) {
            Some(JobState::Pending)
        } else if inner.live_record(id, now).is_some() {
            Some(JobState::Done)
        } else {
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_index_reorders_on_upsert() {
        let mut idx = ScoreIndex::default();
        idx.upsert("a", 10);
        idx.upsert("b", 5);
        idx.upsert("a", 1);
        assert_eq!(idx.up_to(100, 10), vec!["a", "b"]);
        assert_eq!(idx.len(), 2);
        assert!(idx.remove("a"));
        assert!(!idx.remove("a"));
        assert_eq!(idx.up_to(100, 10), vec!["b"]);
    }

    #[test]
    fn score_index_breaks_ties_by_id() {
        let mut idx = ScoreIndex::default();
        idx.upsert("zeta", 7);
        idx.upsert("alpha", 7);
        idx.upsert("mid", 7);
        assert_eq!(idx.up_to(7, 2), vec!["alpha", "mid"]);
    }

    #[tokio::test]
    async fn retention_is_skipped_for_re_enqueued_job() {
        let store = MemoryStore::new();
        store.put("A", "1", 0).await.unwrap();
        let claims = store.claim_due_batch(0, 1, 100).await.unwrap();
        // A newer event lands while the sink is running.
        store.put("A", "2", 500).await.unwrap();
        assert!(store.ack("A", &claims[0].token).await.unwrap());
        store.set_retention("A", 10, 0).await.unwrap();

        assert_eq!(store.get("A", 1_000).await.unwrap().unwrap().payload, "2");
        assert_eq!(store.state("A", 1_000).await.unwrap(), Some(JobState::Pending));
    }

    #[tokio::test]
    async fn held_claim_with_missing_record_is_not_found() {
        let store = MemoryStore::new();
        store.put("A", "1", 0).await.unwrap();
        let claims = store.claim_due_batch(0, 1, 100).await.unwrap();
        store.inner.lock().unwrap().records.remove("A");

        let err = store.retry("A", 50, &claims[0].token).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound { .. }));
        assert_eq!(store.processing_deadline("A"), Some(100));
    }
}
