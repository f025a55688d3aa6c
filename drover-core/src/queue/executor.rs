//! Command task executor

use super::{Task, TaskExecutor};
use crate::error::{DroverError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Payload of a command task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTask {
    /// Program to run
    pub program: String,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Runs `CommandTask` payloads as child processes.
///
/// Output is inherited, so it lands in the worker's own log file.
#[derive(Debug, Clone, Default)]
pub struct CommandTaskExecutor;

impl CommandTaskExecutor {
    /// Task kind handled by this executor
    pub const KIND: &'static str = "command";
}

#[async_trait]
impl TaskExecutor for CommandTaskExecutor {
    async fn execute(&self, task: &Task) -> Result<()> {
        if task.kind != Self::KIND {
            return Err(DroverError::Task(format!(
                "unsupported task kind {:?}",
                task.kind
            )));
        }

        let command: CommandTask = serde_json::from_value(task.payload.clone())?;
        info!(task_id = %task.task_id, program = %command.program, "Running command task");

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let status = cmd.status().await.map_err(|e| {
            DroverError::Task(format!("failed to start {}: {}", command.program, e))
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(DroverError::Task(format!(
                "{} exited with {}",
                command.program, status
            )))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::queue::TaskState;
    use chrono::Utc;
    use serde_json::json;

    fn task(kind: &str, payload: serde_json::Value) -> Task {
        Task {
            task_id: "task-test".to_string(),
            kind: kind.to_string(),
            payload,
            state: TaskState::Claimed,
            claimed_by: Some("worker-test".to_string()),
            enqueued_at: Utc::now(),
            claimed_at: Some(Utc::now()),
            finished_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_successful_command() {
        let executor = CommandTaskExecutor;
        executor
            .execute(&task("command", json!({"program": "true"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_command() {
        let executor = CommandTaskExecutor;
        let err = executor
            .execute(&task("command", json!({"program": "sh", "args": ["-c", "exit 3"]})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected() {
        let executor = CommandTaskExecutor;
        assert!(executor.execute(&task("simulate", json!({}))).await.is_err());
    }
}
