//! OS process introspection
//!
//! Processes are addressed by their [`ProcessIdentity`] (pid plus creation
//! time) rather than by pid alone, so a recycled pid belonging to an unrelated
//! process is reported as "not found" instead of being measured or signalled.

mod memory;

pub use memory::{FixedHostMemory, HostMemory, MemorySnapshot, SysinfoHostMemory};

use crate::error::{DroverError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

/// Durable identity of an OS process: pid plus creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessIdentity {
    /// OS process id
    pub pid: u32,
    /// Creation time in seconds since the Unix epoch, as reported by the OS
    pub started_at: u64,
}

impl ProcessIdentity {
    /// Create an identity pair
    pub fn new(pid: u32, started_at: u64) -> Self {
        Self { pid, started_at }
    }
}

/// Resource usage of a process and its descendants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// Root process id
    pub pid: u32,
    /// Resident memory in bytes, summed over the process tree
    pub rss_bytes: u64,
    /// CPU usage in percent of one core, summed over the process tree
    pub cpu_percent: f32,
    /// Run status of the root process (e.g. "Runnable", "Sleeping")
    pub status: String,
    /// Number of descendant processes included in the totals
    pub child_count: usize,
}

/// Trait for querying and signalling OS processes
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Resource usage for the process matching `identity`, or `None` if no
    /// live process has that pid and creation time. An error means the
    /// process table could not be read, not that the process is gone.
    async fn stats(&self, identity: ProcessIdentity) -> Result<Option<ProcessStats>>;

    /// Forcefully terminate the process matching `identity` and its
    /// descendants. Returns `false` if no matching process exists.
    async fn terminate(&self, identity: ProcessIdentity) -> Result<bool>;

    /// Identity of the calling process
    async fn current_identity(&self) -> Result<ProcessIdentity>;
}

/// [`ProcessInspector`] backed by `sysinfo`.
///
/// Keeps one `System` between calls: CPU usage is computed from the delta
/// between two refreshes, so the first query for a process reports 0%.
#[derive(Clone)]
pub struct SysinfoInspector {
    system: Arc<Mutex<System>>,
}

impl SysinfoInspector {
    /// Create a new inspector
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn with_refreshed<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&System) -> T + Send + 'static,
    {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut system = system
                .lock()
                .map_err(|_| DroverError::Process("process table lock poisoned".to_string()))?;
            system.refresh_processes(ProcessesToUpdate::All, true);
            Ok(f(&system))
        })
        .await
        .map_err(|e| DroverError::Process(format!("process inspection task failed: {}", e)))?
    }
}

impl Default for SysinfoInspector {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the process matching `identity` and collect its descendants
fn process_tree(system: &System, identity: ProcessIdentity) -> Option<Vec<Pid>> {
    let root = Pid::from_u32(identity.pid);
    let process = system.process(root)?;
    if process.start_time() != identity.started_at {
        return None;
    }

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        // Linux lists threads as tasks of their process; they are not children.
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut tree = vec![root];
    let mut cursor = 0;
    while cursor < tree.len() {
        if let Some(kids) = children.get(&tree[cursor]) {
            for kid in kids {
                if !tree.contains(kid) {
                    tree.push(*kid);
                }
            }
        }
        cursor += 1;
    }

    Some(tree)
}

fn collect_stats(system: &System, identity: ProcessIdentity) -> Option<ProcessStats> {
    let tree = process_tree(system, identity)?;
    let root = system.process(Pid::from_u32(identity.pid))?;

    let mut rss_bytes = 0u64;
    let mut cpu_percent = 0f32;
    for pid in &tree {
        if let Some(process) = system.process(*pid) {
            rss_bytes += process.memory();
            cpu_percent += process.cpu_usage();
        }
    }

    Some(ProcessStats {
        pid: identity.pid,
        rss_bytes,
        cpu_percent,
        status: root.status().to_string(),
        child_count: tree.len() - 1,
    })
}

#[cfg(unix)]
fn kill_pid(pid: Pid) -> Result<()> {
    use nix::sys::signal::{Signal, kill};

    let raw = i32::try_from(pid.as_u32())
        .map_err(|_| DroverError::Process(format!("pid {} out of range", pid)))?;
    match kill(nix::unistd::Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(DroverError::Process(format!("failed to kill {}: {}", pid, e))),
    }
}

#[async_trait]
impl ProcessInspector for SysinfoInspector {
    async fn stats(&self, identity: ProcessIdentity) -> Result<Option<ProcessStats>> {
        self.with_refreshed(move |system| collect_stats(system, identity)).await
    }

    async fn terminate(&self, identity: ProcessIdentity) -> Result<bool> {
        self.with_refreshed(move |system| -> Result<bool> {
            let Some(tree) = process_tree(system, identity) else {
                return Ok(false);
            };

            // Children first so none is re-parented mid-kill.
            for pid in tree.iter().rev() {
                debug!(%pid, "Sending SIGKILL");
                #[cfg(unix)]
                kill_pid(*pid)?;
                #[cfg(not(unix))]
                if let Some(process) = system.process(*pid) {
                    process.kill();
                }
            }
            Ok(true)
        })
        .await?
    }

    async fn current_identity(&self) -> Result<ProcessIdentity> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| DroverError::Process(format!("cannot determine own pid: {}", e)))?;
        let started_at = self
            .with_refreshed(move |system| system.process(pid).map(|p| p.start_time()))
            .await?
            .ok_or_else(|| DroverError::Process(format!("own process {} not visible", pid)))?;

        Ok(ProcessIdentity::new(pid.as_u32(), started_at))
    }
}
