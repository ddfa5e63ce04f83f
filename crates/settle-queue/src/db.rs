use rusqlite::Connection;

use crate::error::Result;

/// Initialise the debounce schema in `conn`.
///
/// Creates the job record table and the two score-ordered index tables
/// (idempotent). The `(score, id)` indexes make "lowest score first, ties by
/// id" a single index walk for the claimer and the reaper.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS debounce_jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            payload     TEXT    NOT NULL,   -- JSON from the latest enqueue
            due         INTEGER NOT NULL,   -- epoch ms
            retries     INTEGER NOT NULL DEFAULT 0,
            expires_at  INTEGER             -- epoch ms, NULL while live
        ) STRICT;

        CREATE TABLE IF NOT EXISTS debounce_due (
            id          TEXT    NOT NULL PRIMARY KEY,
            score       INTEGER NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS debounce_processing (
            id          TEXT    NOT NULL PRIMARY KEY,
            deadline    INTEGER NOT NULL,
            token       TEXT    NOT NULL    -- claim token of the current holder
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_debounce_due_score
            ON debounce_due (score, id);
        CREATE INDEX IF NOT EXISTS idx_debounce_processing_deadline
            ON debounce_processing (deadline, id);
        CREATE INDEX IF NOT EXISTS idx_debounce_jobs_expires
            ON debounce_jobs (expires_at) WHERE expires_at IS NOT NULL;
        ",
    )?;
    Ok(())
}
