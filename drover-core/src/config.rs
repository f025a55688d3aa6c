//! Configuration types for the Drover supervisor

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for Drover
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    /// SQLite database shared by the supervisor and all worker processes
    pub database_url: String,

    /// Directory receiving one log file per worker
    pub log_dir: PathBuf,

    /// Admission control configuration
    pub admission: AdmissionConfig,

    /// Supervisor configuration
    pub supervisor: SupervisorConfig,

    /// Worker control loop configuration
    pub worker: WorkerConfig,

    /// Request surface configuration
    pub server: ServerConfig,
}

impl Default for DroverConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://drover.db".to_string(),
            log_dir: PathBuf::from("./logs/workers"),
            admission: AdmissionConfig::default(),
            supervisor: SupervisorConfig::default(),
            worker: WorkerConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Admission control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Hard cap on workers in STARTING, RUNNING or DRAINING
    pub max_workers: usize,

    /// Estimated resident memory of one worker, in MiB
    pub per_worker_memory_mb: u64,

    /// Memory kept free for the rest of the host, in MiB
    pub memory_reserve_mb: u64,

    /// Largest `count` a single spawn request may ask for, forced or not
    pub max_spawn_batch: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            per_worker_memory_mb: 1024,
            memory_reserve_mb: 512,
            max_spawn_batch: 32,
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// STARTING rows older than this are failed by status reconciliation
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// RUNNING rows whose heartbeat is older than this, and whose process is
    /// gone, are failed by status reconciliation
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// Lines of the worker log copied into `last_error_tail`
    pub log_tail_lines: usize,

    /// Binary launched for each worker (defaults to the running executable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_binary: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(120),
            log_tail_lines: 20,
            worker_binary: None,
        }
    }
}

/// Worker control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between control loop iterations
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Delay before re-reading a missing worker row (standalone mode)
    #[serde(with = "humantime_serde")]
    pub deletion_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            deletion_retry_delay: Duration::from_millis(250),
        }
    }
}

/// Request surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP surfaces bind to
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8750".to_string(),
        }
    }
}

impl DroverConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (drover.toml, then the path in DROVER_CONFIG_PATH)
    /// 3. Environment variable overrides (`DROVER_ADMISSION__MAX_WORKERS=8`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or the result fails
    /// validation.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_with(std::env::var_os("DROVER_CONFIG_PATH").map(PathBuf::from))
    }

    /// Like [`load`](Self::load), with an explicit file taking the place of
    /// `DROVER_CONFIG_PATH`.
    pub fn load_with(config_path: Option<PathBuf>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(DroverConfig::default()))
            .merge(Toml::file("drover.toml"));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(
            Env::prefixed("DROVER_")
                .ignore(&["CONFIG_PATH", "LAUNCH_TOKEN"])
                .split("__"),
        );

        let config: DroverConfig = figment.extract().map_err(|e| {
            crate::error::DroverError::Configuration(format!(
                "Failed to load configuration: {}",
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: DroverConfig = Figment::from(Serialized::defaults(DroverConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                crate::error::DroverError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::DroverError;

        if self.admission.max_workers == 0 {
            return Err(DroverError::Configuration(
                "admission.max_workers must be at least 1".to_string(),
            ));
        }
        if self.admission.per_worker_memory_mb == 0 {
            return Err(DroverError::Configuration(
                "admission.per_worker_memory_mb must be greater than 0".to_string(),
            ));
        }
        if self.admission.max_spawn_batch == 0 {
            return Err(DroverError::Configuration(
                "admission.max_spawn_batch must be at least 1".to_string(),
            ));
        }
        if self.worker.poll_interval.is_zero() {
            return Err(DroverError::Configuration(
                "worker.poll_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
