use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use super::{ensure_id, new_claim_token, JobStore};
use crate::db::init_db;
use crate::error::{QueueError, Result};
use crate::types::{Claim, JobRecord, JobState, QueueDepth};

/// How long a writer waits on another process's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`JobStore`].
///
/// Multi-table writes run in `BEGIN IMMEDIATE` transactions, which take the
/// database write lock up front. That lock is what makes the claim a
/// compare-and-move per id: two workers (threads or processes) racing for the
/// same due entry serialize on it, and the loser's `DELETE` affects zero rows.
///
/// Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and run schema setup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        info!(path = %path.display(), "opened debounce store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| QueueError::Unavailable("sqlite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| QueueError::Unavailable(format!("blocking store task failed: {e}")))?
    }
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        payload: row.get(1)?,
        due: row.get(2)?,
        retries: row.get(3)?,
        expires_at: row.get(4)?,
    })
}

fn upsert_due(conn: &Connection, id: &str, score: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO debounce_due (id, score) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET score = excluded.score",
        params![id, score],
    )
}

fn count<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<usize> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(usize::try_from(n).unwrap_or_default())
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn put(&self, id: &str, payload: &str, due: i64) -> Result<()> {
        ensure_id(id)?;
        let id = id.to_string();
        let payload = payload.to_string();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO debounce_jobs (id, payload, due, retries, expires_at)
                 VALUES (?1, ?2, ?3, 0, NULL)
                 ON CONFLICT(id) DO UPDATE SET
                     payload = excluded.payload,
                     due = excluded.due,
                     expires_at = NULL",
                params![id, payload, due],
            )?;
            upsert_due(&tx, &id, due)?;
            tx.commit()?;
            debug!(job_id = %id, due, "job record written");
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str, now: i64) -> Result<Option<JobRecord>> {
        let id = id.to_string();
        self.call(move |conn| {
            let record = conn
                .query_row(
                    "SELECT id, payload, due, retries, expires_at FROM debounce_jobs
                     WHERE id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                    params![id, now],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn set_retention(&self, id: &str, ttl_ms: i64, now: i64) -> Result<()> {
        let id = id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let n = tx.execute(
                "UPDATE debounce_jobs SET expires_at = ?2
                 WHERE id = ?1
                   AND NOT EXISTS (SELECT 1 FROM debounce_due WHERE id = ?1)
                   AND NOT EXISTS (SELECT 1 FROM debounce_processing WHERE id = ?1)",
                params![id, now.saturating_add(ttl_ms)],
            )?;
            tx.commit()?;
            if n == 0 {
                debug!(job_id = %id, "retention skipped; job is pending, claimed again, or gone");
            }
            Ok(())
        })
        .await
    }

    async fn claim_due_batch(
        &self,
        now: i64,
        batch_size: usize,
        visibility_ms: i64,
    ) -> Result<Vec<Claim>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let token = new_claim_token();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let candidates: Vec<String> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id FROM debounce_due
                     WHERE score <= ?1
                     ORDER BY score ASC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now, limit(batch_size)], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let deadline = now.saturating_add(visibility_ms);
            let mut claimed = Vec::with_capacity(candidates.len());
            for id in candidates {
                let removed = tx.execute("DELETE FROM debounce_due WHERE id = ?1", [&id])?;
                if removed != 1 {
                    continue;
                }
                tx.execute(
                    "INSERT INTO debounce_processing (id, deadline, token) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                         deadline = excluded.deadline,
                         token = excluded.token",
                    params![id, deadline, token],
                )?;
                claimed.push(Claim {
                    id,
                    token: token.clone(),
                    deadline,
                });
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn requeue_expired(&self, now: i64, batch_size: usize) -> Result<Vec<String>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let expired: Vec<String> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT id FROM debounce_processing
                     WHERE deadline <= ?1
                     ORDER BY deadline ASC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now, limit(batch_size)], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut reclaimed = Vec::with_capacity(expired.len());
            for id in expired {
                let removed = tx.execute("DELETE FROM debounce_processing WHERE id = ?1", [&id])?;
                if removed != 1 {
                    continue;
                }
                upsert_due(&tx, &id, now)?;
                reclaimed.push(id);
            }
            tx.commit()?;
            Ok(reclaimed)
        })
        .await
    }

    async fn ack(&self, id: &str, token: &str) -> Result<bool> {
        let id = id.to_string();
        let token = token.to_string();
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM debounce_processing WHERE id = ?1 AND token = ?2",
                params![id, token],
            )?;
            Ok(n == 1)
        })
        .await
    }

    async fn reschedule(&self, id: &str, due: i64, token: &str) -> Result<bool> {
        let id = id.to_string();
        let token = token.to_string();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let released = tx.execute(
                "DELETE FROM debounce_processing WHERE id = ?1 AND token = ?2",
                params![id, token],
            )?;
            if released == 1 {
                upsert_due(&tx, &id, due)?;
            }
            tx.commit()?;
            Ok(released == 1)
        })
        .await
    }

    async fn retry(&self, id: &str, due: i64, token: &str) -> Result<Option<u32>> {
        let id = id.to_string();
        let token = token.to_string();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let released = tx.execute(
                "DELETE FROM debounce_processing WHERE id = ?1 AND token = ?2",
                params![id, token],
            )?;
            if released == 0 {
                return Ok(None);
            }
            let retries: Option<u32> = tx
                .query_row(
                    "UPDATE debounce_jobs SET retries = retries + 1
                     WHERE id = ?1
                     RETURNING retries",
                    [&id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(retries) = retries else {
                // Dropping `tx` rolls back; the claim stays in place.
                return Err(QueueError::JobNotFound { id });
            };
            upsert_due(&tx, &id, due)?;
            tx.commit()?;
            Ok(Some(retries))
        })
        .await
    }

    async fn purge_expired(&self, now: i64) -> Result<usize> {
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM debounce_jobs WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                [now],
            )?;
            Ok(n)
        })
        .await
    }

    async fn depth(&self, now: i64) -> Result<QueueDepth> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let depth = QueueDepth {
                pending: count(&tx, "SELECT COUNT(*) FROM debounce_due", params![])?,
                ready: count(&tx, "SELECT COUNT(*) FROM debounce_due WHERE score <= ?1", [now])?,
                processing: count(&tx, "SELECT COUNT(*) FROM debounce_processing", params![])?,
                retained: count(
                    &tx,
                    "SELECT COUNT(*) FROM debounce_jobs WHERE expires_at > ?1",
                    [now],
                )?,
            };
            tx.commit()?;
            Ok(depth)
        })
        .await
    }

    async fn state(&self, id: &str, now: i64) -> Result<Option<JobState>> {
        let id = id.to_string();
        self.call(move |conn| {
            let (in_processing, in_due, live): (bool, bool, bool) = conn.query_row(
                "SELECT
                     EXISTS (SELECT 1 FROM debounce_processing WHERE id = ?1),
                     EXISTS (SELECT 1 FROM debounce_due WHERE id = ?1),
                     EXISTS (SELECT 1 FROM debounce_jobs
                             WHERE id = ?1 AND (expires_at IS NULL OR expires_at > ?2))",
                params![id, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(match (in_processing, in_due, live) {
                (true, _, _) => Some(JobState::Claimed),
                (false, true, _) => Some(JobState::Pending),
                (false, false, true) => Some(JobState::Done),
                _ => None,
            })
        })
        .await
    }
}
