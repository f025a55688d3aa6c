//! SQLite task queue.

use super::{Task, TaskQueue, TaskState};
use crate::db::{from_millis, to_millis};
use crate::error::{DroverError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const TASK_COLUMNS: &str =
    "task_id, kind, payload, state, claimed_by, enqueued_at, claimed_at, finished_at, error";

/// SQLite-backed [`TaskQueue`]
#[derive(Clone)]
pub struct SqliteTaskQueue {
    pool: SqlitePool,
}

impl SqliteTaskQueue {
    /// Wrap an initialized pool (see [`crate::db::connect`])
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn task_from_row(row: &SqliteRow) -> Result<Task> {
        let state: String = row.try_get("state")?;
        let state = TaskState::parse(&state)
            .ok_or_else(|| DroverError::CorruptRecord(format!("unknown task state {:?}", state)))?;
        let payload: String = row.try_get("payload")?;
        let enqueued_at: i64 = row.try_get("enqueued_at")?;

        Ok(Task {
            task_id: row.try_get("task_id")?,
            kind: row.try_get("kind")?,
            payload: serde_json::from_str(&payload)?,
            state,
            claimed_by: row.try_get("claimed_by")?,
            enqueued_at: from_millis(enqueued_at).ok_or_else(|| {
                DroverError::CorruptRecord(format!("bad enqueued_at {}", enqueued_at))
            })?,
            claimed_at: row.try_get::<Option<i64>, _>("claimed_at")?.and_then(from_millis),
            finished_at: row.try_get::<Option<i64>, _>("finished_at")?.and_then(from_millis),
            error: row.try_get("error")?,
        })
    }

    async fn finish(&self, task_id: &str, state: TaskState, error: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET state = ?, finished_at = ?, error = ?
             WHERE task_id = ? AND state = 'CLAIMED'",
        )
        .bind(state.as_str())
        .bind(to_millis(Utc::now()))
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DroverError::Task(format!(
                "task {} is not claimed",
                task_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<String> {
        let task_id = format!("task-{}", uuid::Uuid::new_v4().simple());

        sqlx::query(
            "INSERT INTO tasks (task_id, kind, payload, state, enqueued_at) VALUES (?, ?, ?, 'QUEUED', ?)",
        )
        .bind(&task_id)
        .bind(kind)
        .bind(serde_json::to_string(&payload)?)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(task_id)
    }

    async fn claim_one(&self, worker_id: &str) -> Result<Option<Task>> {
        // Single statement: two workers can never claim the same row.
        let row = sqlx::query(&format!(
            "UPDATE tasks SET state = 'CLAIMED', claimed_by = ?, claimed_at = ?
             WHERE task_id = (
                 SELECT task_id FROM tasks WHERE state = 'QUEUED'
                 ORDER BY enqueued_at ASC, task_id ASC LIMIT 1
             )
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(worker_id)
        .bind(to_millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    async fn mark_complete(&self, task_id: &str) -> Result<()> {
        self.finish(task_id, TaskState::Completed, None).await
    }

    async fn mark_failed(&self, task_id: &str, error: &str) -> Result<()> {
        self.finish(task_id, TaskState::Failed, Some(error)).await
    }

    async fn depth(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE state = 'QUEUED'")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE task_id = ?", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }
}
