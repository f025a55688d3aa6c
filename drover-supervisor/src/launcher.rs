//! Launching worker processes

use crate::{Result, SupervisorError};
use async_trait::async_trait;
use drover_core::worker::Worker;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Environment variable carrying the launch token to a worker process
pub const LAUNCH_TOKEN_ENV: &str = "DROVER_LAUNCH_TOKEN";

/// Everything a launcher needs to start one worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub worker_id: String,
    pub launch_token: String,
    pub log_path: PathBuf,
}

impl LaunchSpec {
    /// Launch parameters for a freshly admitted worker row
    pub fn for_worker(worker: &Worker) -> Self {
        Self {
            worker_id: worker.worker_id.clone(),
            launch_token: worker.launch_token.clone(),
            log_path: worker.log_path.clone(),
        }
    }
}

/// Trait for starting worker processes
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker process; returns its OS pid
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32>;
}

/// Starts workers as `<binary> worker --worker-id <id> --mode server`.
///
/// The launch token travels in [`LAUNCH_TOKEN_ENV`]; stdout and stderr are
/// appended to the worker's log file. Each child gets a reaper task so the
/// supervising process never accumulates zombies.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    binary: PathBuf,
    envs: Vec<(String, String)>,
}

impl CommandLauncher {
    /// Create a launcher for an explicit worker binary
    pub fn new(binary: impl Into<PathBuf>) -> Result<Self> {
        let binary = binary.into();
        if !binary.exists() {
            return Err(SupervisorError::BinaryNotFound(
                binary.display().to_string(),
            ));
        }

        Ok(Self {
            binary,
            envs: Vec::new(),
        })
    }

    /// Launcher re-invoking the running executable
    pub fn current_exe() -> Result<Self> {
        Self::new(std::env::current_exe()?)
    }

    /// Extra environment variable for launched workers
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn open_log(spec: &LaunchSpec) -> Result<(std::fs::File, std::fs::File)> {
        if let Some(parent) = spec.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)?;
        let stderr = stdout.try_clone()?;
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let (stdout, stderr) = Self::open_log(spec)?;

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg("worker")
            .arg("--worker-id")
            .arg(&spec.worker_id)
            .arg("--mode")
            .arg("server")
            .env(LAUNCH_TOKEN_ENV, &spec.launch_token)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        // Own process group: a Ctrl-C aimed at the dashboard must not reach workers.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::Launch(format!(
                "failed to spawn {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| SupervisorError::Launch("child exited before reporting a pid".into()))?;

        let worker_id = spec.worker_id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(worker_id = %worker_id, pid, %status, "Worker process exited"),
                Err(e) => warn!(worker_id = %worker_id, pid, "Failed to reap worker process: {}", e),
            }
        });

        info!(
            worker_id = %spec.worker_id,
            pid,
            log_path = %spec.log_path.display(),
            "Launched worker process"
        );
        Ok(pid)
    }
}
