//! Drover Supervisor - admits, launches, monitors and retires local worker processes
//!
//! Workers are separate OS processes pulling jobs from a shared task queue.
//! Everything the supervisor and the workers agree on lives in the worker
//! record store from `drover-core`:
//!
//! - [`AdmissionController`] decides how many workers the host can sustain
//! - [`WorkerSupervisor`] spawns, drains, aborts and reports on workers
//! - [`WorkerProcess`] is the control loop each worker process runs
//! - [`api::router`] exposes status and commands over HTTP
//!
//! ## Lifecycle
//!
//! ```text
//! STARTING -> RUNNING -> DRAINING -> DEAD
//!     |          |
//!     +-> FAILED <-+
//! ```
//!
//! Drain is cooperative: the worker notices DRAINING on its next iteration and
//! retires itself. Abort is the only forceful path and requires confirmation.

mod admission;
mod control;
mod error;
mod launcher;
mod supervisor;

pub mod api;

#[cfg(test)]
mod testing;

pub use admission::AdmissionController;
pub use control::{DrainCheck, LoopExit, LoopSettings, RunMode, WorkerProcess};
pub use error::{HandshakeFailure, Result, SupervisorError};
pub use launcher::{CommandLauncher, LAUNCH_TOKEN_ENV, LaunchSpec, WorkerLauncher};
pub use supervisor::{
    ABORTED_BY_USER, AUDIT_TARGET, AbortReport, CapacityStatus, EXITED_WITHOUT_DRAINING,
    LaunchFailure, MemoryStatus, ReconciliationReport, SpawnReport, StatusReport,
    SupervisorSettings, WorkerStatus, WorkerSupervisor,
};
