//! Durable job queue query functions.
//!
//! A job moves `pending -> running -> done`, or back to `pending` with a
//! `not_before` delay on a retryable failure, or to `failed` once attempts
//! are exhausted. At most one open (pending or running) job exists per
//! `(kind, dedupe_key)`.

use rolesync_types::{SyncJob, JOB_KIND_SYNC};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::{DbError, Result};

/// A claimed or inspected job row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRow {
    pub id: i64,
    pub kind: String,
    pub dedupe_key: String,
    pub payload: String,
    pub state: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub not_before: u64,
    pub last_error: Option<String>,
}

impl JobRow {
    /// Decode the payload of a `sync` job.
    pub fn sync_job(&self) -> Result<SyncJob> {
        serde_json::from_str(&self.payload).map_err(|e| DbError::Serialization(e.to_string()))
    }
}

const COLUMNS: &str =
    "id, kind, dedupe_key, payload, state, attempts, max_attempts, not_before, last_error";

fn from_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        dedupe_key: row.get(2)?,
        payload: row.get(3)?,
        state: row.get(4)?,
        attempts: row.get(5)?,
        max_attempts: row.get(6)?,
        not_before: row.get::<_, i64>(7)? as u64,
        last_error: row.get(8)?,
    })
}

/// Enqueue a job. Returns `false` if an open job with the same key exists.
pub fn enqueue(
    conn: &Connection,
    kind: &str,
    dedupe_key: &str,
    payload: &str,
    max_attempts: u32,
    now: u64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO sync_jobs
         (kind, dedupe_key, payload, max_attempts, not_before, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
        rusqlite::params![kind, dedupe_key, payload, max_attempts, now as i64],
    )?;
    if inserted == 0 {
        tracing::debug!(kind, dedupe_key, "job already open");
    }
    Ok(inserted == 1)
}

/// Enqueue a tenant sync, deduplicated per tenant.
pub fn enqueue_sync(conn: &Connection, job: &SyncJob, max_attempts: u32, now: u64) -> Result<bool> {
    let payload =
        serde_json::to_string(job).map_err(|e| DbError::Serialization(e.to_string()))?;
    enqueue(
        conn,
        JOB_KIND_SYNC,
        &job.tenant_external_id,
        &payload,
        max_attempts,
        now,
    )
}

/// Atomically claim the oldest ready pending job.
///
/// The claim bumps `attempts` and moves the job to `running` in one
/// statement, so two workers never claim the same row.
pub fn claim_next(conn: &Connection, now: u64) -> Result<Option<JobRow>> {
    Ok(conn
        .query_row(
            &format!(
                "UPDATE sync_jobs
                 SET state = 'running', attempts = attempts + 1, updated_at = ?1
                 WHERE id = (
                    SELECT id FROM sync_jobs
                    WHERE state = 'pending' AND not_before <= ?1
                    ORDER BY id LIMIT 1
                 )
                 RETURNING {COLUMNS}"
            ),
            [now as i64],
            from_row,
        )
        .optional()?)
}

/// Mark a running job done.
pub fn complete(conn: &Connection, id: i64, now: u64) -> Result<()> {
    conn.execute(
        "UPDATE sync_jobs SET state = 'done', last_error = NULL, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![now as i64, id],
    )?;
    Ok(())
}

/// Record a failed attempt.
///
/// A retryable failure with attempts left goes back to `pending`, ready
/// again at `now + backoff_secs`. Anything else is terminal. Returns
/// `true` if the job will be retried.
pub fn fail(
    conn: &Connection,
    id: i64,
    error: &str,
    retryable: bool,
    backoff_secs: u64,
    now: u64,
) -> Result<bool> {
    let state: String = conn.query_row(
        "UPDATE sync_jobs SET
            state = CASE WHEN ?1 AND attempts < max_attempts THEN 'pending' ELSE 'failed' END,
            not_before = CASE WHEN ?1 AND attempts < max_attempts THEN ?2 ELSE not_before END,
            last_error = ?3,
            updated_at = ?4
         WHERE id = ?5
         RETURNING state",
        rusqlite::params![
            retryable,
            now.saturating_add(backoff_secs) as i64,
            error,
            now as i64,
            id
        ],
        |row| row.get(0),
    )
    .map_err(crate::classify(format!("job {id}")))?;
    Ok(state == "pending")
}

/// Return jobs left `running` by a previous process to `pending`.
pub fn requeue_running(conn: &Connection, now: u64) -> Result<usize> {
    let n = conn.execute(
        "UPDATE sync_jobs SET state = 'pending', not_before = ?1, updated_at = ?1
         WHERE state = 'running'",
        [now as i64],
    )?;
    Ok(n)
}

/// Delete done and failed jobs last touched before `older_than`.
pub fn prune_finished(conn: &Connection, older_than: u64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM sync_jobs WHERE state IN ('done', 'failed') AND updated_at < ?1",
        [older_than as i64],
    )?;
    Ok(n)
}

/// Get a job by id.
pub fn get(conn: &Connection, id: i64) -> Result<JobRow> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM sync_jobs WHERE id = ?1"),
        [id],
        from_row,
    )
    .map_err(crate::classify(format!("job {id}")))
}

/// Number of jobs in the given state.
pub fn count_by_state(conn: &Connection, state: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_jobs WHERE state = ?1",
        [state],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
