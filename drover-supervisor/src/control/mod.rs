//! The control loop every worker process runs
//!
//! A worker first binds its record to itself (handshake), then repeats:
//! check for a drain request or a deleted record, claim and run at most one
//! task, write a heartbeat, sleep. The loop only exits through a drain, and
//! retires the record (DRAINING -> DEAD) on the way out.


use crate::error::HandshakeFailure;
use crate::{Result, SupervisorError};
use chrono::Utc;
use drover_core::config::WorkerConfig;
use drover_core::process::ProcessIdentity;
use drover_core::queue::{TaskExecutor, TaskQueue};
use drover_core::store::WorkerStore;
use drover_core::worker::WorkerState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How the worker process was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Started by hand; tolerates a briefly missing record
    Standalone,
    /// Started by a supervisor; a missing record means drain now
    Server,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Standalone => write!(f, "standalone"),
            RunMode::Server => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standalone" => Ok(RunMode::Standalone),
            "server" => Ok(RunMode::Server),
            other => Err(SupervisorError::InvalidRequest(format!(
                "unknown run mode {:?}",
                other
            ))),
        }
    }
}

/// Result of a drain check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainCheck {
    /// Leave the loop
    Drain,
    /// Keep working
    Continue,
}

/// Loop timing
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub mode: RunMode,
    /// Sleep between iterations
    pub poll_interval: Duration,
    /// Standalone wait before re-reading a missing record
    pub deletion_retry_delay: Duration,
}

impl LoopSettings {
    pub fn from_config(mode: RunMode, config: &WorkerConfig) -> Self {
        Self {
            mode,
            poll_interval: config.poll_interval,
            deletion_retry_delay: config.deletion_retry_delay,
        }
    }
}

/// Counters reported when the loop exits
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopExit {
    pub iterations: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// The record was moved DRAINING -> DEAD
    pub marked_dead: bool,
}

enum TaskOutcome {
    Completed,
    Failed,
}

/// One worker process's view of its own record and the task queue
pub struct WorkerProcess {
    worker_id: String,
    store: Arc<dyn WorkerStore>,
    queue: Arc<dyn TaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    settings: LoopSettings,
}

impl WorkerProcess {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn WorkerStore>,
        queue: Arc<dyn TaskQueue>,
        executor: Arc<dyn TaskExecutor>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            queue,
            executor,
            settings,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Bind the record to this process.
    ///
    /// Nothing is written unless the launch token matches; the claim itself
    /// only succeeds on a STARTING row with no recorded pid.
    pub async fn handshake(&self, launch_token: &str, identity: ProcessIdentity) -> Result<()> {
        let Some(record) = self.store.get(&self.worker_id).await? else {
            warn!(worker_id = %self.worker_id, "Worker record missing at startup");
            return Err(self.rejected(HandshakeFailure::MissingRecord));
        };

        if record.launch_token != launch_token {
            warn!(worker_id = %self.worker_id, "Launch token mismatch; refusing to start");
            return Err(self.rejected(HandshakeFailure::TokenMismatch));
        }

        let claimed = self
            .store
            .claim_identity(&self.worker_id, launch_token, identity, Utc::now())
            .await?;
        if !claimed {
            warn!(
                worker_id = %self.worker_id,
                state = %record.state,
                "Worker record already claimed or no longer starting"
            );
            return Err(self.rejected(HandshakeFailure::AlreadyClaimed));
        }

        info!(
            worker_id = %self.worker_id,
            pid = identity.pid,
            mode = %self.settings.mode,
            "Handshake complete; worker RUNNING"
        );
        Ok(())
    }

    fn rejected(&self, reason: HandshakeFailure) -> SupervisorError {
        SupervisorError::HandshakeRejected {
            worker_id: self.worker_id.clone(),
            reason,
        }
    }

    /// Decide whether the loop should keep going.
    ///
    /// Fails open: a lookup error is logged and treated as "continue".
    pub async fn check_draining_state(&self) -> DrainCheck {
        match self.store.get_state(&self.worker_id).await {
            Ok(Some(state)) => Self::decide(state),
            Ok(None) => self.on_missing_record().await,
            Err(e) => {
                warn!(worker_id = %self.worker_id, "unexpected drain-check failure: {}", e);
                DrainCheck::Continue
            }
        }
    }

    fn decide(state: WorkerState) -> DrainCheck {
        if state == WorkerState::Draining {
            DrainCheck::Drain
        } else {
            DrainCheck::Continue
        }
    }

    async fn on_missing_record(&self) -> DrainCheck {
        if self.settings.mode == RunMode::Standalone {
            // One retry: the row may be mid-rewrite by an operator.
            tokio::time::sleep(self.settings.deletion_retry_delay).await;
            match self.store.get_state(&self.worker_id).await {
                Ok(Some(state)) => {
                    debug!(worker_id = %self.worker_id, "Worker record reappeared");
                    return Self::decide(state);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id = %self.worker_id, "unexpected drain-check failure: {}", e);
                    return DrainCheck::Continue;
                }
            }
        }

        info!(
            worker_id = %self.worker_id,
            mode = %self.settings.mode,
            "worker record missing from DB"
        );
        DrainCheck::Drain
    }

    /// One iteration after the drain check: at most one task, then a heartbeat
    pub async fn run_iteration(&self, exit: &mut LoopExit) {
        match self.process_one_task().await {
            Some(TaskOutcome::Completed) => exit.tasks_completed += 1,
            Some(TaskOutcome::Failed) => exit.tasks_failed += 1,
            None => {}
        }

        match self.store.record_heartbeat(&self.worker_id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => debug!(worker_id = %self.worker_id, "Heartbeat skipped; record missing"),
            Err(e) => warn!(worker_id = %self.worker_id, "Heartbeat write failed: {}", e),
        }

        exit.iterations += 1;
    }

    async fn process_one_task(&self) -> Option<TaskOutcome> {
        let task = match self.queue.claim_one(&self.worker_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return None,
            Err(e) => {
                warn!(worker_id = %self.worker_id, "Task claim failed: {}", e);
                return None;
            }
        };

        info!(worker_id = %self.worker_id, task_id = %task.task_id, kind = %task.kind, "Claimed task");

        match self.executor.execute(&task).await {
            Ok(()) => {
                if let Err(e) = self.queue.mark_complete(&task.task_id).await {
                    warn!(task_id = %task.task_id, "Failed to mark task complete: {}", e);
                }
                info!(worker_id = %self.worker_id, task_id = %task.task_id, "Task completed");
                Some(TaskOutcome::Completed)
            }
            Err(e) => {
                warn!(worker_id = %self.worker_id, task_id = %task.task_id, "Task failed: {}", e);
                if let Err(mark) = self.queue.mark_failed(&task.task_id, &e.to_string()).await {
                    warn!(task_id = %task.task_id, "Failed to mark task failed: {}", mark);
                }
                Some(TaskOutcome::Failed)
            }
        }
    }

    /// Run until drained, then retire the record
    pub async fn run(&self) -> LoopExit {
        info!(worker_id = %self.worker_id, mode = %self.settings.mode, "Worker control loop started");
        let mut exit = LoopExit::default();

        loop {
            if self.check_draining_state().await == DrainCheck::Drain {
                break;
            }
            self.run_iteration(&mut exit).await;
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        exit.marked_dead = self.retire().await;
        info!(
            worker_id = %self.worker_id,
            iterations = exit.iterations,
            tasks_completed = exit.tasks_completed,
            tasks_failed = exit.tasks_failed,
            "Worker control loop stopped"
        );
        exit
    }

    /// Handshake, then [`run`](Self::run)
    pub async fn start(&self, launch_token: &str, identity: ProcessIdentity) -> Result<LoopExit> {
        self.handshake(launch_token, identity).await?;
        Ok(self.run().await)
    }

    async fn retire(&self) -> bool {
        match self
            .store
            .transition(&self.worker_id, WorkerState::Draining, WorkerState::Dead, None)
            .await
        {
            Ok(true) => {
                info!(worker_id = %self.worker_id, "Worker drained; marked DEAD");
                true
            }
            Ok(false) => {
                debug!(worker_id = %self.worker_id, "No DRAINING record to retire");
                false
            }
            Err(e) => {
                warn!(worker_id = %self.worker_id, "Failed to mark worker DEAD: {}", e);
                false
            }
        }
    }
}
