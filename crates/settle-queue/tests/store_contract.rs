//! Behaviour every `JobStore` must share, run against both implementations.

use std::sync::Arc;

use settle_queue::{Claim, JobState, JobStore, MemoryStore, QueueDepth, QueueError, SqliteStore};

fn stores() -> Vec<(&'static str, Arc<dyn JobStore>)> {
    let memory: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let sqlite: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

fn ids(claims: &[Claim]) -> Vec<&str> {
    claims.iter().map(|c| c.id.as_str()).collect()
}

/// Claim exactly `id` at `now` and return its token.
async fn claim_one(store: &dyn JobStore, id: &str, now: i64, visibility_ms: i64) -> String {
    let claims = store.claim_due_batch(now, 10, visibility_ms).await.unwrap();
    assert_eq!(ids(&claims), vec![id]);
    claims[0].token.clone()
}

#[tokio::test]
async fn put_is_last_write_wins_with_single_due_entry() {
    for (name, store) in stores() {
        store.put("A", r#"{"x":1}"#, 1_000).await.unwrap();
        store.put("A", r#"{"x":2}"#, 1_500).await.unwrap();

        let record = store.get("A", 0).await.unwrap().unwrap();
        assert_eq!(record.payload, r#"{"x":2}"#, "{name}");
        assert_eq!(record.due, 1_500, "{name}");
        assert_eq!(record.retries, 0, "{name}");
        assert_eq!(store.depth(0).await.unwrap().pending, 1, "{name}");

        // The first 1000 deadline never fires.
        assert!(store.claim_due_batch(1_100, 10, 100).await.unwrap().is_empty(), "{name}");
        let claims = store.claim_due_batch(1_500, 10, 100).await.unwrap();
        assert_eq!(ids(&claims), vec!["A"], "{name}");
        assert_eq!(claims[0].deadline, 1_600, "{name}");
    }
}

#[tokio::test]
async fn claim_is_earliest_first_ties_by_id_and_bounded() {
    for (name, store) in stores() {
        store.put("c", "0", 30).await.unwrap();
        store.put("b", "0", 10).await.unwrap();
        store.put("a", "0", 10).await.unwrap();
        store.put("later", "0", 1_000).await.unwrap();

        let first = store.claim_due_batch(100, 2, 50).await.unwrap();
        assert_eq!(ids(&first), vec!["a", "b"], "{name}");
        let second = store.claim_due_batch(100, 10, 50).await.unwrap();
        assert_eq!(ids(&second), vec!["c"], "{name}");
        assert_ne!(first[0].token, second[0].token, "{name}");

        let depth = store.depth(100).await.unwrap();
        assert_eq!(
            depth,
            QueueDepth {
                pending: 1,
                ready: 0,
                processing: 3,
                retained: 0
            },
            "{name}"
        );
    }
}

#[tokio::test]
async fn zero_batch_claims_nothing() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        assert!(store.claim_due_batch(10, 0, 50).await.unwrap().is_empty(), "{name}");
        assert_eq!(store.state("A", 10).await.unwrap(), Some(JobState::Pending), "{name}");
    }
}

#[tokio::test]
async fn requeue_expired_respects_visibility_deadline() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        store.claim_due_batch(1_100, 10, 30_000).await.unwrap();

        assert!(store.requeue_expired(31_099, 10).await.unwrap().is_empty(), "{name}");
        assert_eq!(store.requeue_expired(31_100, 10).await.unwrap(), vec!["A"], "{name}");
        assert_eq!(store.state("A", 31_100).await.unwrap(), Some(JobState::Pending), "{name}");
        // Requeued with score = now, immediately claimable.
        claim_one(store.as_ref(), "A", 31_100, 1).await;
    }
}

#[tokio::test]
async fn requeue_expired_is_bounded_by_batch() {
    for (name, store) in stores() {
        for id in ["a", "b", "c"] {
            store.put(id, "0", 0).await.unwrap();
        }
        store.claim_due_batch(0, 10, 10).await.unwrap();
        assert_eq!(store.requeue_expired(100, 2).await.unwrap().len(), 2, "{name}");
        assert_eq!(store.requeue_expired(100, 2).await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn put_while_claimed_leaves_processing_entry_alone() {
    for (name, store) in stores() {
        store.put("A", "1", 0).await.unwrap();
        store.claim_due_batch(0, 10, 1_000).await.unwrap();
        store.put("A", "2", 5_000).await.unwrap();

        let depth = store.depth(0).await.unwrap();
        assert_eq!((depth.pending, depth.processing), (1, 1), "{name}");
        assert_eq!(store.state("A", 0).await.unwrap(), Some(JobState::Claimed), "{name}");
        assert_eq!(store.get("A", 0).await.unwrap().unwrap().due, 5_000, "{name}");
    }
}

#[tokio::test]
async fn reschedule_and_retry_move_out_of_processing() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        let token = claim_one(store.as_ref(), "A", 0, 100).await;
        assert!(store.reschedule("A", 700, &token).await.unwrap(), "{name}");
        assert_eq!(store.state("A", 0).await.unwrap(), Some(JobState::Pending), "{name}");
        assert!(store.claim_due_batch(699, 1, 100).await.unwrap().is_empty(), "{name}");

        let token = claim_one(store.as_ref(), "A", 700, 100).await;
        assert_eq!(store.retry("A", 900, &token).await.unwrap(), Some(1), "{name}");
        let token = claim_one(store.as_ref(), "A", 900, 100).await;
        assert_eq!(store.retry("A", 1_000, &token).await.unwrap(), Some(2), "{name}");
        assert_eq!(store.depth(0).await.unwrap().processing, 0, "{name}");
        assert_eq!(store.get("A", 0).await.unwrap().unwrap().retries, 2, "{name}");

        // Retries survive a later enqueue.
        store.put("A", "1", 5).await.unwrap();
        assert_eq!(store.get("A", 0).await.unwrap().unwrap().retries, 2, "{name}");
    }
}

#[tokio::test]
async fn resolving_without_the_claim_changes_nothing() {
    for (name, store) in stores() {
        assert_eq!(store.retry("ghost", 1, "no-token").await.unwrap(), None, "{name}");

        store.put("A", "0", 0).await.unwrap();
        store.claim_due_batch(0, 1, 100).await.unwrap();
        assert!(!store.ack("A", "wrong").await.unwrap(), "{name}");
        assert!(!store.reschedule("A", 50, "wrong").await.unwrap(), "{name}");
        assert_eq!(store.retry("A", 50, "wrong").await.unwrap(), None, "{name}");

        assert_eq!(store.state("A", 0).await.unwrap(), Some(JobState::Claimed), "{name}");
        assert_eq!(store.get("A", 0).await.unwrap().unwrap().retries, 0, "{name}");
        let depth = store.depth(0).await.unwrap();
        assert_eq!((depth.pending, depth.processing), (0, 1), "{name}");
    }
}

#[tokio::test]
async fn ack_reports_whether_claim_was_held() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        let token = claim_one(store.as_ref(), "A", 0, 10).await;
        assert!(store.ack("A", &token).await.unwrap(), "{name}");
        assert!(!store.ack("A", &token).await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn late_ack_from_superseded_claim_keeps_newer_claim_recoverable() {
    for (name, store) in stores() {
        store.put("A", "1", 0).await.unwrap();
        let first = claim_one(store.as_ref(), "A", 0, 30_000).await;

        // Re-enqueued with no delay and claimed again while the first
        // holder's sink is still running.
        store.put("A", "2", 10).await.unwrap();
        let second = claim_one(store.as_ref(), "A", 10, 30_000).await;
        assert_ne!(first, second, "{name}");

        // First holder finishes.
        assert!(!store.ack("A", &first).await.unwrap(), "{name}");
        store.set_retention("A", 1_000, 20).await.unwrap();
        assert_eq!(store.state("A", 20).await.unwrap(), Some(JobState::Claimed), "{name}");
        assert_eq!(store.get("A", 20).await.unwrap().unwrap().expires_at, None, "{name}");

        // Second holder dies; the reaper still finds its claim.
        assert_eq!(store.requeue_expired(100_000, 10).await.unwrap(), vec!["A"], "{name}");
        assert_eq!(store.state("A", 100_000).await.unwrap(), Some(JobState::Pending), "{name}");
        assert_eq!(store.get("A", 100_000).await.unwrap().unwrap().payload, "2", "{name}");

        // And the dead holder's token no longer resolves anything either.
        assert!(!store.ack("A", &second).await.unwrap(), "{name}");
    }
}

#[tokio::test]
async fn retention_hides_then_purges_record() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        let token = claim_one(store.as_ref(), "A", 0, 10).await;
        store.ack("A", &token).await.unwrap();
        store.set_retention("A", 1_000, 0).await.unwrap();

        assert_eq!(store.state("A", 999).await.unwrap(), Some(JobState::Done), "{name}");
        assert_eq!(store.depth(999).await.unwrap().retained, 1, "{name}");
        assert!(store.get("A", 1_000).await.unwrap().is_none(), "{name}");
        assert_eq!(store.state("A", 1_000).await.unwrap(), None, "{name}");

        assert_eq!(store.purge_expired(999).await.unwrap(), 0, "{name}");
        assert_eq!(store.purge_expired(1_000).await.unwrap(), 1, "{name}");
        assert!(store.get("A", 0).await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn retention_is_not_applied_while_claimed() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        store.claim_due_batch(0, 1, 10).await.unwrap();
        store.set_retention("A", 100, 0).await.unwrap();
        assert_eq!(store.get("A", 0).await.unwrap().unwrap().expires_at, None, "{name}");
    }
}

#[tokio::test]
async fn enqueue_after_completion_clears_retention() {
    for (name, store) in stores() {
        store.put("A", "0", 0).await.unwrap();
        let token = claim_one(store.as_ref(), "A", 0, 10).await;
        store.ack("A", &token).await.unwrap();
        store.set_retention("A", 100, 0).await.unwrap();

        store.put("A", "1", 50).await.unwrap();
        assert_eq!(store.purge_expired(10_000).await.unwrap(), 0, "{name}");
        let record = store.get("A", 10_000).await.unwrap().unwrap();
        assert_eq!(record.expires_at, None, "{name}");
        assert_eq!(record.payload, "1", "{name}");
    }
}

#[tokio::test]
async fn empty_id_is_rejected() {
    for (name, store) in stores() {
        let err = store.put("", "0", 0).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidArgument(_)), "{name}");
    }
}
