//! Worker record storage
//!
//! The store is the only resource shared between the supervisor and worker
//! processes. Every state change is a compare-and-set on the expected current
//! state, checked against the worker state machine, so concurrent writers with
//! different roles never clobber each other.

mod sqlite;


pub use sqlite::SqliteWorkerStore;

use crate::error::Result;
use crate::process::ProcessIdentity;
use crate::worker::{Worker, WorkerState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of an admission-serialized insert
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Workers in STARTING, RUNNING or DRAINING when the lock was taken
    pub in_flight_before: usize,
    /// Rows actually inserted, in candidate order
    pub created: Vec<Worker>,
}

/// Trait for worker record backends
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// Insert as many `candidates` as `limit` allows, under one write lock.
    ///
    /// The in-flight count and the inserts happen inside a single exclusive
    /// transaction, so concurrent callers (in this or any other process)
    /// cannot jointly exceed `limit`. `None` inserts every candidate.
    async fn admit(&self, candidates: Vec<Worker>, limit: Option<usize>) -> Result<Admission>;

    /// Load a worker row
    async fn get(&self, worker_id: &str) -> Result<Option<Worker>>;

    /// Load only the state of a worker row
    async fn get_state(&self, worker_id: &str) -> Result<Option<WorkerState>>;

    /// All rows, oldest first
    async fn list(&self) -> Result<Vec<Worker>>;

    /// Rows in `state`, oldest first
    async fn list_in_state(&self, state: WorkerState) -> Result<Vec<Worker>>;

    /// Rows in `state` created before `cutoff`
    async fn list_in_state_older_than(
        &self,
        state: WorkerState,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Worker>>;

    /// Number of rows in STARTING, RUNNING or DRAINING
    async fn count_in_flight(&self) -> Result<usize>;

    /// Bind a STARTING row to the calling process.
    ///
    /// Succeeds only if the row exists, `launch_token` matches, the row is
    /// still STARTING and no pid was recorded yet. Writes pid, creation time,
    /// RUNNING and the first heartbeat in one statement. Returns `false`
    /// without touching the row otherwise.
    async fn claim_identity(
        &self,
        worker_id: &str,
        launch_token: &str,
        identity: ProcessIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Advance the heartbeat (never moves it backwards).
    /// Returns `false` if the row is gone.
    async fn record_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Move a row from `from` to `to`, optionally replacing `last_error_tail`.
    ///
    /// Returns `false` if the row is missing or no longer in `from`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DroverError::InvalidTransition`] if the state machine
    /// has no `from -> to` edge.
    async fn transition(
        &self,
        worker_id: &str,
        from: WorkerState,
        to: WorkerState,
        last_error_tail: Option<&str>,
    ) -> Result<bool>;
}
