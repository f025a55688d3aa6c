//! Worker records and the worker lifecycle state machine
//!
//! A [`Worker`] row represents one supervised OS process. The supervisor creates
//! it (identity and launch token), the worker process claims it during the
//! handshake and keeps its heartbeat fresh, and status reconciliation may fail a
//! row whose process never finished starting.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Row created, process launched, handshake pending
    Starting,

    /// Handshake complete, control loop running
    Running,

    /// Graceful stop requested; the worker exits after its current task
    Draining,

    /// Worker exited through its own control loop
    Dead,

    /// Startup timed out, the process crashed, or an operator aborted it
    Failed,
}

impl WorkerState {
    /// All states, in lifecycle order
    pub const ALL: [WorkerState; 5] = [
        WorkerState::Starting,
        WorkerState::Running,
        WorkerState::Draining,
        WorkerState::Dead,
        WorkerState::Failed,
    ];

    /// States that occupy an admission slot
    pub const IN_FLIGHT: [WorkerState; 3] = [
        WorkerState::Starting,
        WorkerState::Running,
        WorkerState::Draining,
    ];

    /// Stable name used in storage and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "STARTING",
            WorkerState::Running => "RUNNING",
            WorkerState::Draining => "DRAINING",
            WorkerState::Dead => "DEAD",
            WorkerState::Failed => "FAILED",
        }
    }

    /// Parse a stored state name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTING" => Some(WorkerState::Starting),
            "RUNNING" => Some(WorkerState::Running),
            "DRAINING" => Some(WorkerState::Draining),
            "DEAD" => Some(WorkerState::Dead),
            "FAILED" => Some(WorkerState::Failed),
            _ => None,
        }
    }

    /// Whether this state occupies an admission slot
    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Transitions are monotonic: nothing re-enters STARTING and nothing
    /// leaves a terminal state.
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Failed)
                | (Running, Draining)
                | (Running, Failed)
                | (Draining, Dead)
                | (Draining, Failed)
        )
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of hex characters in a launch token
pub const LAUNCH_TOKEN_LEN: usize = 16;

/// Generate a fresh launch token (16 lowercase hex characters)
pub fn generate_launch_token() -> String {
    let bits: u64 = rand::rng().random();
    format!("{:0width$x}", bits, width = LAUNCH_TOKEN_LEN)
}

/// Generate a fresh worker id
pub fn generate_worker_id() -> String {
    format!("worker-{}", uuid::Uuid::new_v4().simple())
}

/// A supervised worker process record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique, supervisor-generated identifier
    pub worker_id: String,

    /// One-time secret the process must present at handshake.
    ///
    /// Never serialized to callers of the status surface.
    #[serde(skip_serializing, default)]
    pub launch_token: String,

    /// Current lifecycle state
    pub state: WorkerState,

    /// OS process id, written by the worker during handshake
    pub pid: Option<u32>,

    /// OS process creation time (seconds since the Unix epoch)
    pub pid_started_at: Option<u64>,

    /// When the supervisor created the row
    pub started_at: DateTime<Utc>,

    /// Last control-loop heartbeat
    pub heartbeat: Option<DateTime<Utc>>,

    /// File receiving the process' stdout and stderr
    pub log_path: PathBuf,

    /// Last known error text (abort reason or log tail)
    pub last_error_tail: Option<String>,
}

impl Worker {
    /// Create a new STARTING worker with a fresh id and launch token
    pub fn new(log_dir: &Path) -> Self {
        let worker_id = generate_worker_id();
        let log_path = log_dir.join(format!("{}.log", worker_id));

        Self {
            worker_id,
            launch_token: generate_launch_token(),
            state: WorkerState::Starting,
            pid: None,
            pid_started_at: None,
            started_at: Utc::now(),
            heartbeat: None,
            log_path,
            last_error_tail: None,
        }
    }

    /// Recorded process identity, once the worker has handshaken
    pub fn process_identity(&self) -> Option<crate::process::ProcessIdentity> {
        match (self.pid, self.pid_started_at) {
            (Some(pid), Some(started_at)) => {
                Some(crate::process::ProcessIdentity::new(pid, started_at))
            }
            _ => None,
        }
    }

    /// Age of the last heartbeat relative to `now`
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.heartbeat.map(|beat| now - beat)
    }
}
