//! Worker supervisor: spawn, drain, abort and status reconciliation

mod report;


pub use report::{
    AbortReport, CapacityStatus, LaunchFailure, MemoryStatus, ReconciliationReport, SpawnReport,
    StatusReport, WorkerStatus,
};

use crate::admission::AdmissionController;
use crate::launcher::{LaunchSpec, WorkerLauncher};
use crate::{Result, SupervisorError};
use chrono::{DateTime, Utc};
use drover_core::config::DroverConfig;
use drover_core::logtail;
use drover_core::process::ProcessInspector;
use drover_core::queue::TaskQueue;
use drover_core::store::WorkerStore;
use drover_core::worker::{Worker, WorkerState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// `last_error_tail` written by a confirmed abort
pub const ABORTED_BY_USER: &str = "Aborted by user";

/// `last_error_tail` prefix for a RUNNING worker whose process vanished
pub const EXITED_WITHOUT_DRAINING: &str = "Worker process exited without draining";

/// Tracing target for operator audit events
pub const AUDIT_TARGET: &str = "drover::audit";

/// Supervisor timing and file settings
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub log_dir: PathBuf,
    pub startup_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub log_tail_lines: usize,
}

impl SupervisorSettings {
    pub fn from_config(config: &DroverConfig) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            startup_timeout: config.supervisor.startup_timeout,
            heartbeat_timeout: config.supervisor.heartbeat_timeout,
            log_tail_lines: config.supervisor.log_tail_lines,
        }
    }
}

/// Orchestrates the worker fleet on this host.
///
/// Built once at process start and shared (as `Arc`) by every request
/// handler. Holds no fleet state of its own: the store is the single source
/// of truth, so several supervisors (dashboard, CLI) can act concurrently.
pub struct WorkerSupervisor {
    store: Arc<dyn WorkerStore>,
    queue: Arc<dyn TaskQueue>,
    admission: AdmissionController,
    launcher: Arc<dyn WorkerLauncher>,
    inspector: Arc<dyn ProcessInspector>,
    settings: SupervisorSettings,
}

impl WorkerSupervisor {
    pub fn new(
        store: Arc<dyn WorkerStore>,
        queue: Arc<dyn TaskQueue>,
        admission: AdmissionController,
        launcher: Arc<dyn WorkerLauncher>,
        inspector: Arc<dyn ProcessInspector>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            store,
            queue,
            admission,
            launcher,
            inspector,
            settings,
        }
    }

    /// Admit and launch up to `count` workers.
    ///
    /// Without `force`, the in-flight count is re-checked against
    /// [`AdmissionController::admissible_workers`] inside the store's
    /// exclusive admission transaction and only the free slots are filled;
    /// the remainder is reported as rejected. `force` bypasses admission and
    /// leaves an audit warning. Requests above the configured
    /// `max_spawn_batch` are rejected outright.
    pub async fn spawn_worker(&self, count: usize, force: bool) -> Result<SpawnReport> {
        if count == 0 {
            return Err(SupervisorError::InvalidRequest(
                "count must be at least 1".to_string(),
            ));
        }
        let max_batch = self.admission.config().max_spawn_batch;
        if count > max_batch {
            return Err(SupervisorError::InvalidRequest(format!(
                "count {} exceeds the per-request limit of {}",
                count, max_batch
            )));
        }

        let memory = self.admission.memory_snapshot().await;
        let admissible = self.admission.admissible_for(&memory);

        let limit = if force {
            warn!(
                target: AUDIT_TARGET,
                requested = count,
                admissible_overridden = admissible,
                total_memory_mb = memory.total_mb(),
                available_memory_mb = memory.available_mb(),
                per_worker_memory_mb = self.admission.config().per_worker_memory_mb,
                "Forced spawn bypasses admission control"
            );
            None
        } else {
            Some(admissible)
        };

        // In-flight rows can only shrink the free slots below `admissible`.
        let candidate_count = limit.map_or(count, |admissible| count.min(admissible));
        let candidates = (0..candidate_count)
            .map(|_| Worker::new(&self.settings.log_dir))
            .collect();
        let admitted = self.store.admit(candidates, limit).await?;

        let mut report = SpawnReport {
            requested: count,
            spawned: Vec::with_capacity(admitted.created.len()),
            rejected: count - admitted.created.len(),
            admissible,
            in_flight_before: admitted.in_flight_before,
            forced: force,
            launch_failures: Vec::new(),
        };

        for worker in &admitted.created {
            report.spawned.push(worker.worker_id.clone());

            let spec = LaunchSpec::for_worker(worker);
            match self.launcher.launch(&spec).await {
                Ok(pid) => debug!(worker_id = %worker.worker_id, pid, "Worker launch requested"),
                Err(e) => {
                    // The row stays STARTING; startup-timeout reconciliation fails it.
                    error!(worker_id = %worker.worker_id, "Worker launch failed: {}", e);
                    report.launch_failures.push(LaunchFailure {
                        worker_id: worker.worker_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.rejected > 0 {
            info!(
                requested = count,
                spawned = report.spawned.len(),
                rejected = report.rejected,
                admissible,
                in_flight_before = report.in_flight_before,
                "Spawn request exceeded admission capacity"
            );
        } else {
            info!(spawned = report.spawned.len(), forced = force, "Spawned workers");
        }

        Ok(report)
    }

    /// Ask a RUNNING worker to finish its current task and exit.
    ///
    /// With no id, the longest-running RUNNING worker is chosen. The OS
    /// process is never touched; the worker retires itself.
    pub async fn drain_worker(&self, worker_id: Option<&str>) -> Result<Worker> {
        let target = match worker_id {
            Some(id) => self
                .store
                .get(id)
                .await?
                .ok_or_else(|| SupervisorError::WorkerNotFound(id.to_string()))?,
            None => self
                .store
                .list_in_state(WorkerState::Running)
                .await?
                .into_iter()
                .next()
                .ok_or(SupervisorError::NoRunningWorker)?,
        };

        if target.state != WorkerState::Running {
            return Err(SupervisorError::InvalidState {
                worker_id: target.worker_id,
                state: target.state,
                action: "drain",
            });
        }

        let moved = self
            .store
            .transition(
                &target.worker_id,
                WorkerState::Running,
                WorkerState::Draining,
                None,
            )
            .await?;
        if !moved {
            return Err(self.state_conflict(&target.worker_id, "drain").await);
        }

        info!(worker_id = %target.worker_id, "Worker set to DRAINING");
        self.store
            .get(&target.worker_id)
            .await?
            .ok_or(SupervisorError::WorkerNotFound(target.worker_id))
    }

    /// Forcefully stop a worker.
    ///
    /// Rejected without `confirm`. Otherwise the row becomes FAILED with
    /// [`ABORTED_BY_USER`] and the recorded process tree is killed. A
    /// DRAINING worker can be aborted too; DEAD and FAILED rows cannot.
    pub async fn abort_worker(&self, worker_id: &str, confirm: bool) -> Result<AbortReport> {
        if !confirm {
            info!(worker_id, "Abort rejected: confirmation missing");
            return Err(SupervisorError::ConfirmationRequired {
                worker_id: worker_id.to_string(),
            });
        }

        let worker = self
            .store
            .get(worker_id)
            .await?
            .ok_or_else(|| SupervisorError::WorkerNotFound(worker_id.to_string()))?;

        let from = match worker.state {
            WorkerState::Starting | WorkerState::Running | WorkerState::Draining => worker.state,
            state => {
                return Err(SupervisorError::InvalidState {
                    worker_id: worker_id.to_string(),
                    state,
                    action: "abort",
                });
            }
        };

        let moved = self
            .store
            .transition(worker_id, from, WorkerState::Failed, Some(ABORTED_BY_USER))
            .await?;
        if !moved {
            return Err(self.state_conflict(worker_id, "abort").await);
        }

        // A STARTING worker may have handshaken since we read the row.
        let identity = match worker.process_identity() {
            Some(identity) => Some(identity),
            None => self
                .store
                .get(worker_id)
                .await?
                .and_then(|w| w.process_identity()),
        };

        let process_terminated = match identity {
            Some(identity) => match self.inspector.terminate(identity).await {
                Ok(killed) => killed,
                Err(e) => {
                    error!(worker_id, pid = identity.pid, "Failed to terminate worker: {}", e);
                    false
                }
            },
            None => false,
        };

        warn!(
            worker_id,
            previous_state = %from,
            process_terminated,
            "Worker aborted"
        );

        Ok(AbortReport {
            worker_id: worker_id.to_string(),
            previous_state: from,
            process_terminated,
        })
    }

    /// Fleet status, after reconciling stale rows
    pub async fn status(&self) -> Result<StatusReport> {
        let reconciled = self.reconcile().await?;
        let now = Utc::now();

        let mut workers = Vec::new();
        for worker in self.store.list().await? {
            let stats = match worker.process_identity() {
                Some(identity) if worker.state.is_in_flight() => {
                    match self.inspector.stats(identity).await {
                        Ok(stats) => stats,
                        Err(e) => {
                            warn!(worker_id = %worker.worker_id, "Process stats unavailable: {}", e);
                            None
                        }
                    }
                }
                _ => None,
            };
            workers.push(WorkerStatus::new(worker, stats, now));
        }

        let memory = self.admission.memory_snapshot().await;
        let admissible = self.admission.admissible_for(&memory);
        let in_flight = self.store.count_in_flight().await?;
        let config = self.admission.config();

        Ok(StatusReport {
            generated_at: now,
            workers,
            memory: MemoryStatus {
                total_mb: memory.total_mb(),
                available_mb: memory.available_mb(),
                per_worker_memory_mb: config.per_worker_memory_mb,
                memory_reserve_mb: config.memory_reserve_mb,
            },
            capacity: CapacityStatus {
                max_workers: config.max_workers,
                admissible,
                in_flight,
            },
            queue_depth: self.queue.depth().await?,
            reconciled,
        })
    }

    /// Fail rows that can no longer make progress.
    ///
    /// STARTING rows older than the startup timeout, and RUNNING rows whose
    /// heartbeat is stale and whose process is gone. Idempotent: every
    /// change is a compare-and-set, so re-running (or racing another
    /// reconciler) never double-applies.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let now = Utc::now();
        let mut report = ReconciliationReport::default();

        if let Some(cutoff) = cutoff_for(now, self.settings.startup_timeout) {
            let stale = self
                .store
                .list_in_state_older_than(WorkerState::Starting, cutoff)
                .await?;
            for worker in stale {
                let message = format!(
                    "Worker did not complete startup within {}s",
                    self.settings.startup_timeout.as_secs()
                );
                let tail = self.error_tail(&message, &worker.log_path).await;
                if self
                    .store
                    .transition(
                        &worker.worker_id,
                        WorkerState::Starting,
                        WorkerState::Failed,
                        Some(&tail),
                    )
                    .await?
                {
                    warn!(worker_id = %worker.worker_id, "Startup timeout; worker marked FAILED");
                    report.startup_timeouts.push(worker.worker_id);
                }
            }
        }

        if let Some(cutoff) = cutoff_for(now, self.settings.heartbeat_timeout) {
            for worker in self.store.list_in_state(WorkerState::Running).await? {
                let stale = worker.heartbeat.is_none_or(|beat| beat < cutoff);
                if !stale {
                    continue;
                }
                let Some(identity) = worker.process_identity() else {
                    continue;
                };
                match self.inspector.stats(identity).await {
                    Ok(Some(_)) => {
                        debug!(worker_id = %worker.worker_id, "Heartbeat stale but process alive");
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            worker_id = %worker.worker_id,
                            "Cannot inspect worker process; leaving it RUNNING: {}", e
                        );
                        continue;
                    }
                }

                let tail = self
                    .error_tail(EXITED_WITHOUT_DRAINING, &worker.log_path)
                    .await;
                if self
                    .store
                    .transition(
                        &worker.worker_id,
                        WorkerState::Running,
                        WorkerState::Failed,
                        Some(&tail),
                    )
                    .await?
                {
                    warn!(
                        worker_id = %worker.worker_id,
                        pid = identity.pid,
                        "Worker process gone; marked FAILED"
                    );
                    report.lost_contact.push(worker.worker_id);
                }
            }
        }

        Ok(report)
    }

    async fn error_tail(&self, message: &str, log_path: &Path) -> String {
        match logtail::tail_lines(log_path, self.settings.log_tail_lines).await {
            Ok(Some(tail)) => format!("{}\n{}", message, tail),
            Ok(None) => message.to_string(),
            Err(e) => {
                warn!(log_path = %log_path.display(), "Failed to read worker log: {}", e);
                message.to_string()
            }
        }
    }

    /// Error for a compare-and-set that lost a race
    async fn state_conflict(&self, worker_id: &str, action: &'static str) -> SupervisorError {
        match self.store.get_state(worker_id).await {
            Ok(Some(state)) => SupervisorError::InvalidState {
                worker_id: worker_id.to_string(),
                state,
                action,
            },
            Ok(None) => SupervisorError::WorkerNotFound(worker_id.to_string()),
            Err(e) => e.into(),
        }
    }
}

fn cutoff_for(now: DateTime<Utc>, age: Duration) -> Option<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age).ok()?;
    now.checked_sub_signed(age)
}
