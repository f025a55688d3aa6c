//! Shared task queue consumed by worker processes
//!
//! Workers claim at most one task per control-loop iteration. Retry and
//! backoff policy belong to whoever enqueues; the queue only records the
//! outcome of each attempt.

mod executor;
mod sqlite;

pub use executor::{CommandTaskExecutor, CommandTask};
pub use sqlite::SqliteTaskQueue;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for a worker
    Queued,
    /// Claimed by a worker
    Claimed,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskState {
    /// Stable name used in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "QUEUED",
            TaskState::Claimed => "CLAIMED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
        }
    }

    /// Parse a stored state name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(TaskState::Queued),
            "CLAIMED" => Some(TaskState::Claimed),
            "COMPLETED" => Some(TaskState::Completed),
            "FAILED" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

/// A unit of work in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id
    pub task_id: String,
    /// Free-form task kind, interpreted by the executor
    pub kind: String,
    /// Task arguments
    pub payload: serde_json::Value,
    /// Current state
    pub state: TaskState,
    /// Worker that claimed the task
    pub claimed_by: Option<String>,
    /// When the task was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// When a worker claimed it
    pub claimed_at: Option<DateTime<Utc>>,
    /// When it completed or failed
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure description
    pub error: Option<String>,
}

/// Trait for task queue backends
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a task; returns its id
    async fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<String>;

    /// Atomically claim the oldest queued task for `worker_id`
    async fn claim_one(&self, worker_id: &str) -> Result<Option<Task>>;

    /// Mark a claimed task completed
    async fn mark_complete(&self, task_id: &str) -> Result<()>;

    /// Mark a claimed task failed
    async fn mark_failed(&self, task_id: &str, error: &str) -> Result<()>;

    /// Number of queued (unclaimed) tasks
    async fn depth(&self) -> Result<usize>;

    /// Load a task
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;
}

/// Trait for running a claimed task inside a worker process
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run the task to completion
    async fn execute(&self, task: &Task) -> Result<()>;
}
