//! Test doubles shared by the supervisor, control loop and API tests

use crate::admission::AdmissionController;
use crate::launcher::{LaunchSpec, WorkerLauncher};
use crate::supervisor::{SupervisorSettings, WorkerSupervisor};
use crate::{Result, SupervisorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::config::AdmissionConfig;
use drover_core::db;
use drover_core::process::{FixedHostMemory, ProcessIdentity, ProcessInspector, ProcessStats};
use drover_core::queue::{SqliteTaskQueue, Task, TaskExecutor};
use drover_core::store::{Admission, SqliteWorkerStore, WorkerStore};
use drover_core::worker::{Worker, WorkerState};
use drover_core::{DroverError, Result as CoreResult};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Per-worker memory used by every harness
pub const PER_WORKER_MB: u64 = 1024;

/// Spawn request ceiling used by every harness
pub const MAX_SPAWN_BATCH: usize = 32;

/// Records launches instead of starting processes
#[derive(Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<LaunchSpec>>,
    next_pid: AtomicU32,
    fail: AtomicBool,
}

impl RecordingLauncher {
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().unwrap().clone()
    }

    pub fn fail_launches(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkerLauncher for RecordingLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::Launch("no such binary".to_string()));
        }
        self.launches.lock().unwrap().push(spec.clone());
        Ok(40_000 + self.next_pid.fetch_add(1, Ordering::SeqCst))
    }
}

/// Process table with explicitly registered live processes
pub struct FakeInspector {
    current: ProcessIdentity,
    alive: Mutex<HashSet<ProcessIdentity>>,
    terminated: Mutex<Vec<ProcessIdentity>>,
    unreadable: AtomicBool,
}

impl FakeInspector {
    pub fn new(current: ProcessIdentity) -> Self {
        Self {
            current,
            alive: Mutex::new(HashSet::from([current])),
            terminated: Mutex::new(Vec::new()),
            unreadable: AtomicBool::new(false),
        }
    }

    pub fn add_process(&self, identity: ProcessIdentity) {
        self.alive.lock().unwrap().insert(identity);
    }

    pub fn terminated(&self) -> Vec<ProcessIdentity> {
        self.terminated.lock().unwrap().clone()
    }

    /// Make every stats query fail as if the process table were unreadable
    pub fn set_unreadable(&self, unreadable: bool) {
        self.unreadable.store(unreadable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessInspector for FakeInspector {
    async fn stats(&self, identity: ProcessIdentity) -> CoreResult<Option<ProcessStats>> {
        if self.unreadable.load(Ordering::SeqCst) {
            return Err(DroverError::Process("process table lock poisoned".to_string()));
        }
        Ok(self
            .alive
            .lock()
            .unwrap()
            .contains(&identity)
            .then(|| ProcessStats {
                pid: identity.pid,
                rss_bytes: 64 * 1024 * 1024,
                cpu_percent: 1.5,
                status: "Sleeping".to_string(),
                child_count: 0,
            }))
    }

    async fn terminate(&self, identity: ProcessIdentity) -> CoreResult<bool> {
        let was_alive = self.alive.lock().unwrap().remove(&identity);
        if was_alive {
            self.terminated.lock().unwrap().push(identity);
        }
        Ok(was_alive)
    }

    async fn current_identity(&self) -> CoreResult<ProcessIdentity> {
        Ok(self.current)
    }
}

/// SQLite store wrapper that counts state reads and can fail them on demand
pub struct FlakyStore {
    inner: SqliteWorkerStore,
    state_reads: AtomicUsize,
    fail_state_reads: AtomicBool,
    candidate_batches: Mutex<Vec<usize>>,
}

impl FlakyStore {
    pub fn new(inner: SqliteWorkerStore) -> Self {
        Self {
            inner,
            state_reads: AtomicUsize::new(0),
            fail_state_reads: AtomicBool::new(false),
            candidate_batches: Mutex::new(Vec::new()),
        }
    }

    pub fn state_reads(&self) -> usize {
        self.state_reads.load(Ordering::SeqCst)
    }

    /// Number of candidates passed to each `admit` call
    pub fn candidate_batches(&self) -> Vec<usize> {
        self.candidate_batches.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_state_reads.store(failing, Ordering::SeqCst);
    }

    pub async fn delete_row(&self, worker_id: &str) {
        sqlx::query("DELETE FROM workers WHERE worker_id = ?")
            .bind(worker_id)
            .execute(self.inner.pool())
            .await
            .unwrap();
    }
}

#[async_trait]
impl WorkerStore for FlakyStore {
    async fn admit(&self, candidates: Vec<Worker>, limit: Option<usize>) -> CoreResult<Admission> {
        self.candidate_batches.lock().unwrap().push(candidates.len());
        self.inner.admit(candidates, limit).await
    }

    async fn get(&self, worker_id: &str) -> CoreResult<Option<Worker>> {
        self.inner.get(worker_id).await
    }

    async fn get_state(&self, worker_id: &str) -> CoreResult<Option<WorkerState>> {
        self.state_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_state_reads.load(Ordering::SeqCst) {
            return Err(DroverError::Other("database is locked".to_string()));
        }
        self.inner.get_state(worker_id).await
    }

    async fn list(&self) -> CoreResult<Vec<Worker>> {
        self.inner.list().await
    }

    async fn list_in_state(&self, state: WorkerState) -> CoreResult<Vec<Worker>> {
        self.inner.list_in_state(state).await
    }

    async fn list_in_state_older_than(
        &self,
        state: WorkerState,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<Worker>> {
        self.inner.list_in_state_older_than(state, cutoff).await
    }

    async fn count_in_flight(&self) -> CoreResult<usize> {
        self.inner.count_in_flight().await
    }

    async fn claim_identity(
        &self,
        worker_id: &str,
        launch_token: &str,
        identity: ProcessIdentity,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        self.inner
            .claim_identity(worker_id, launch_token, identity, now)
            .await
    }

    async fn record_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> CoreResult<bool> {
        self.inner.record_heartbeat(worker_id, now).await
    }

    async fn transition(
        &self,
        worker_id: &str,
        from: WorkerState,
        to: WorkerState,
        last_error_tail: Option<&str>,
    ) -> CoreResult<bool> {
        self.inner
            .transition(worker_id, from, to, last_error_tail)
            .await
    }
}

/// Executor that succeeds unless the task kind is `"fail"`
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &Task) -> CoreResult<()> {
        self.executed.lock().unwrap().push(task.task_id.clone());
        if task.kind == "fail" {
            Err(DroverError::Task("simulated failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// A supervisor wired to in-memory SQLite and test doubles
pub struct Harness {
    pub supervisor: Arc<WorkerSupervisor>,
    pub store: Arc<FlakyStore>,
    pub queue: Arc<SqliteTaskQueue>,
    pub memory: FixedHostMemory,
    pub launcher: Arc<RecordingLauncher>,
    pub inspector: Arc<FakeInspector>,
    pub log_dir: tempfile::TempDir,
}

impl Harness {
    /// Admission capacity pinned at `admissible` workers
    pub async fn with_admissible(admissible: usize) -> Self {
        // Memory for exactly `admissible` workers, max_workers well above it.
        let available_mb = admissible as u64 * PER_WORKER_MB;
        Self::build(16, available_mb).await
    }

    pub async fn build(max_workers: usize, available_mb: u64) -> Self {
        let pool = db::in_memory().await.unwrap();
        let store = Arc::new(FlakyStore::new(SqliteWorkerStore::new(pool.clone())));
        let queue = Arc::new(SqliteTaskQueue::new(pool));
        let memory = FixedHostMemory::from_mb(32 * 1024, available_mb);
        let launcher = Arc::new(RecordingLauncher::default());
        let inspector = Arc::new(FakeInspector::new(ProcessIdentity::new(
            std::process::id(),
            1_700_000_000,
        )));
        let log_dir = tempfile::tempdir().unwrap();

        let admission = AdmissionController::new(
            AdmissionConfig {
                max_workers,
                per_worker_memory_mb: PER_WORKER_MB,
                memory_reserve_mb: 0,
                max_spawn_batch: MAX_SPAWN_BATCH,
            },
            Arc::new(memory.clone()),
        );
        let settings = SupervisorSettings {
            log_dir: log_dir.path().to_path_buf(),
            startup_timeout: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(120),
            log_tail_lines: 5,
        };

        let supervisor = Arc::new(WorkerSupervisor::new(
            store.clone(),
            queue.clone(),
            admission,
            launcher.clone(),
            inspector.clone(),
            settings,
        ));

        Self {
            supervisor,
            store,
            queue,
            memory,
            launcher,
            inspector,
            log_dir,
        }
    }

    pub fn log_path(&self, worker_id: &str) -> PathBuf {
        self.log_dir.path().join(format!("{}.log", worker_id))
    }

    /// Spawn one worker and complete its handshake as `identity`
    pub async fn running_worker(&self, identity: ProcessIdentity) -> Worker {
        let report = self.supervisor.spawn_worker(1, true).await.unwrap();
        let worker_id = report.spawned[0].clone();
        let row = self.store.get(&worker_id).await.unwrap().unwrap();
        assert!(
            self.store
                .claim_identity(&worker_id, &row.launch_token, identity, Utc::now())
                .await
                .unwrap()
        );
        self.inspector.add_process(identity);
        self.store.get(&worker_id).await.unwrap().unwrap()
    }
}

/// One captured tracing event
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub level: Level,
    pub fields: HashMap<String, String>,
}

/// Layer collecting every event it sees
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedEvents {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn at(&self, target: &str, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.target == target && e.level == level)
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor(HashMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.0.lock().unwrap().push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            fields: visitor.0,
        });
    }
}
