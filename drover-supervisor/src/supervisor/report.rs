//! Results of supervisor operations, serialized as-is by the request surfaces

use chrono::{DateTime, Utc};
use drover_core::process::ProcessStats;
use drover_core::worker::{Worker, WorkerState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of a spawn request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnReport {
    /// Workers asked for
    pub requested: usize,
    /// Ids of the rows created, launched or not
    pub spawned: Vec<String>,
    /// Workers refused by admission control
    pub rejected: usize,
    /// Admissible capacity at the time of the request
    pub admissible: usize,
    /// In-flight workers when admission ran
    pub in_flight_before: usize,
    /// Admission control was bypassed
    pub forced: bool,
    /// Rows whose process could not be started
    pub launch_failures: Vec<LaunchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchFailure {
    pub worker_id: String,
    pub reason: String,
}

/// Outcome of a confirmed abort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReport {
    pub worker_id: String,
    pub previous_state: WorkerState,
    /// Whether a live process matching the recorded identity was killed
    pub process_terminated: bool,
}

/// Rows moved to FAILED by a reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// STARTING rows that outlived the startup timeout
    pub startup_timeouts: Vec<String>,
    /// RUNNING rows whose process disappeared without draining
    pub lost_contact: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_empty(&self) -> bool {
        self.startup_timeouts.is_empty() && self.lost_contact.is_empty()
    }
}

/// One worker as shown on the status surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub heartbeat: Option<DateTime<Utc>>,
    /// Seconds since the last heartbeat
    pub heartbeat_age_secs: Option<i64>,
    pub log_path: PathBuf,
    pub last_error_tail: Option<String>,
    /// Live resource usage, when the process is found
    pub stats: Option<ProcessStats>,
}

impl WorkerStatus {
    pub fn new(worker: Worker, stats: Option<ProcessStats>, now: DateTime<Utc>) -> Self {
        Self {
            heartbeat_age_secs: worker.heartbeat_age(now).map(|age| age.num_seconds()),
            worker_id: worker.worker_id,
            state: worker.state,
            pid: worker.pid,
            started_at: worker.started_at,
            heartbeat: worker.heartbeat,
            log_path: worker.log_path,
            last_error_tail: worker.last_error_tail,
            stats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub total_mb: u64,
    pub available_mb: u64,
    pub per_worker_memory_mb: u64,
    pub memory_reserve_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStatus {
    pub max_workers: usize,
    pub admissible: usize,
    pub in_flight: usize,
}

/// Everything the status surface returns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub workers: Vec<WorkerStatus>,
    pub memory: MemoryStatus,
    pub capacity: CapacityStatus,
    /// Tasks waiting for a worker
    pub queue_depth: usize,
    /// Changes made by the reconciliation that preceded this report
    pub reconciled: ReconciliationReport,
}
