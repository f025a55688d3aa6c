//! # Drover core
//!
//! Shared building blocks for the Drover local worker supervisor:
//! - Worker records and their lifecycle state machine
//! - A SQLite record store shared by the supervisor and every worker process
//! - The task queue workers pull from
//! - OS process introspection keyed by (pid, creation time)
//! - Layered configuration
//!
//! The supervisor itself (admission, spawn/drain/abort, the worker control
//! loop and the request surfaces) lives in `drover-supervisor`.

pub mod config;
pub mod db;
pub mod error;
pub mod logtail;
pub mod process;
pub mod queue;
pub mod store;
pub mod worker;

pub use error::{DroverError, Result};

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::DroverConfig;
    pub use crate::error::{DroverError, Result};
    pub use crate::process::{
        HostMemory, MemorySnapshot, ProcessIdentity, ProcessInspector, ProcessStats,
    };
    pub use crate::queue::{Task, TaskExecutor, TaskQueue};
    pub use crate::store::{Admission, WorkerStore};
    pub use crate::worker::{Worker, WorkerState};
}
