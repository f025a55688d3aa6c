//! SQLite connection pool and schema shared by worker records and the task queue

use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if needed) the database at `url` and apply the schema.
///
/// WAL journaling lets worker processes read their rows while the supervisor
/// holds the write lock during admission.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database, for tests.
///
/// The connection is never recycled; an in-memory database lives exactly as
/// long as its connection.
pub async fn in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS workers (
            worker_id TEXT PRIMARY KEY,
            launch_token TEXT NOT NULL,
            state TEXT NOT NULL,
            pid INTEGER,
            pid_started_at INTEGER,
            started_at INTEGER NOT NULL,
            heartbeat INTEGER,
            log_path TEXT NOT NULL,
            last_error_tail TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workers_state ON workers(state, started_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            state TEXT NOT NULL,
            claimed_by TEXT,
            enqueued_at INTEGER NOT NULL,
            claimed_at INTEGER,
            finished_at INTEGER,
            error TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state, enqueued_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Timestamps are stored as Unix milliseconds
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}
