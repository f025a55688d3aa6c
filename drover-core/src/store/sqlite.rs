//! SQLite worker store.

use super::{Admission, WorkerStore};
use crate::db::{from_millis, to_millis};
use crate::error::{DroverError, Result};
use crate::process::ProcessIdentity;
use crate::worker::{Worker, WorkerState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::PathBuf;
use tracing::{debug, warn};

const WORKER_COLUMNS: &str = "worker_id, launch_token, state, pid, pid_started_at, started_at, \
     heartbeat, log_path, last_error_tail";

const IN_FLIGHT_FILTER: &str = "state IN ('STARTING', 'RUNNING', 'DRAINING')";

/// SQLite-backed [`WorkerStore`]
#[derive(Clone)]
pub struct SqliteWorkerStore {
    pool: SqlitePool,
}

impl SqliteWorkerStore {
    /// Wrap an initialized pool (see [`crate::db::connect`])
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn worker_from_row(row: &SqliteRow) -> Result<Worker> {
        let state: String = row.try_get("state")?;
        let state = WorkerState::parse(&state)
            .ok_or_else(|| DroverError::CorruptRecord(format!("unknown worker state {:?}", state)))?;

        let pid = row
            .try_get::<Option<i64>, _>("pid")?
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DroverError::CorruptRecord(format!("pid out of range: {}", e)))?;
        let pid_started_at = row
            .try_get::<Option<i64>, _>("pid_started_at")?
            .map(u64::try_from)
            .transpose()
            .map_err(|e| DroverError::CorruptRecord(format!("pid_started_at out of range: {}", e)))?;

        let started_at: i64 = row.try_get("started_at")?;
        let started_at = from_millis(started_at)
            .ok_or_else(|| DroverError::CorruptRecord(format!("bad started_at {}", started_at)))?;
        let heartbeat = row
            .try_get::<Option<i64>, _>("heartbeat")?
            .and_then(from_millis);

        let log_path: String = row.try_get("log_path")?;

        Ok(Worker {
            worker_id: row.try_get("worker_id")?,
            launch_token: row.try_get("launch_token")?,
            state,
            pid,
            pid_started_at,
            started_at,
            heartbeat,
            log_path: PathBuf::from(log_path),
            last_error_tail: row.try_get("last_error_tail")?,
        })
    }

    async fn admit_in_transaction(
        pool: SqlitePool,
        candidates: Vec<Worker>,
        limit: Option<usize>,
    ) -> Result<Admission> {
        let mut conn = pool.acquire().await?;

        // IMMEDIATE takes the database write lock up front: the count below
        // cannot go stale before the inserts commit.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let admission = match Self::admit_locked(&mut conn, candidates, limit).await {
            Ok(admission) => admission,
            Err(e) => {
                Self::rollback(&mut conn).await;
                return Err(e);
            }
        };

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            Self::rollback(&mut conn).await;
            return Err(e.into());
        }

        debug!(
            in_flight_before = admission.in_flight_before,
            created = admission.created.len(),
            "Admission committed"
        );
        Ok(admission)
    }

    async fn rollback(conn: &mut SqliteConnection) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            warn!("Failed to roll back admission: {}", e);
        }
    }

    async fn admit_locked(
        conn: &mut SqliteConnection,
        candidates: Vec<Worker>,
        limit: Option<usize>,
    ) -> Result<Admission> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM workers WHERE {}",
            IN_FLIGHT_FILTER
        ))
        .fetch_one(&mut *conn)
        .await?;
        let in_flight_before = usize::try_from(row.try_get::<i64, _>("n")?).unwrap_or(0);

        let slots = match limit {
            Some(limit) => limit.saturating_sub(in_flight_before),
            None => candidates.len(),
        };

        let mut created = Vec::with_capacity(slots.min(candidates.len()));
        for worker in candidates.into_iter().take(slots) {
            sqlx::query(&format!(
                "INSERT INTO workers ({}) VALUES (?, ?, ?, NULL, NULL, ?, NULL, ?, NULL)",
                WORKER_COLUMNS
            ))
            .bind(&worker.worker_id)
            .bind(&worker.launch_token)
            .bind(WorkerState::Starting.as_str())
            .bind(to_millis(worker.started_at))
            .bind(worker.log_path.to_string_lossy().into_owned())
            .execute(&mut *conn)
            .await?;

            created.push(Worker {
                state: WorkerState::Starting,
                pid: None,
                pid_started_at: None,
                heartbeat: None,
                last_error_tail: None,
                ..worker
            });
        }

        Ok(Admission {
            in_flight_before,
            created,
        })
    }
}

#[async_trait]
impl WorkerStore for SqliteWorkerStore {
    async fn admit(&self, candidates: Vec<Worker>, limit: Option<usize>) -> Result<Admission> {
        // Detached: a caller dropped mid-transaction would otherwise hand a
        // connection still holding the write lock back to the pool.
        let pool = self.pool.clone();
        tokio::spawn(Self::admit_in_transaction(pool, candidates, limit))
            .await
            .map_err(|e| DroverError::Other(format!("admission task failed: {}", e)))?
    }

    async fn get(&self, worker_id: &str) -> Result<Option<Worker>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workers WHERE worker_id = ?",
            WORKER_COLUMNS
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::worker_from_row).transpose()
    }

    async fn get_state(&self, worker_id: &str) -> Result<Option<WorkerState>> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        state
            .map(|s| {
                WorkerState::parse(&s)
                    .ok_or_else(|| DroverError::CorruptRecord(format!("unknown worker state {:?}", s)))
            })
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workers ORDER BY started_at ASC",
            WORKER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::worker_from_row).collect()
    }

    async fn list_in_state(&self, state: WorkerState) -> Result<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workers WHERE state = ? ORDER BY started_at ASC",
            WORKER_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::worker_from_row).collect()
    }

    async fn list_in_state_older_than(
        &self,
        state: WorkerState,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workers WHERE state = ? AND started_at < ? ORDER BY started_at ASC",
            WORKER_COLUMNS
        ))
        .bind(state.as_str())
        .bind(to_millis(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::worker_from_row).collect()
    }

    async fn count_in_flight(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM workers WHERE {}",
            IN_FLIGHT_FILTER
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn claim_identity(
        &self,
        worker_id: &str,
        launch_token: &str,
        identity: ProcessIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let started_at = i64::try_from(identity.started_at).map_err(|e| {
            DroverError::Process(format!("process start time out of range: {}", e))
        })?;

        let result = sqlx::query(
            "UPDATE workers
             SET pid = ?, pid_started_at = ?, state = 'RUNNING', heartbeat = ?
             WHERE worker_id = ? AND launch_token = ? AND state = 'STARTING' AND pid IS NULL",
        )
        .bind(i64::from(identity.pid))
        .bind(started_at)
        .bind(to_millis(now))
        .bind(worker_id)
        .bind(launch_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE workers SET heartbeat = MAX(COALESCE(heartbeat, 0), ?) WHERE worker_id = ?",
        )
        .bind(to_millis(now))
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        worker_id: &str,
        from: WorkerState,
        to: WorkerState,
        last_error_tail: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(DroverError::InvalidTransition { from, to });
        }

        let result = sqlx::query(
            "UPDATE workers
             SET state = ?, last_error_tail = COALESCE(?, last_error_tail)
             WHERE worker_id = ? AND state = ?",
        )
        .bind(to.as_str())
        .bind(last_error_tail)
        .bind(worker_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() == 1;
        if moved {
            debug!(worker_id, %from, %to, "Worker transitioned");
        }
        Ok(moved)
    }
}
