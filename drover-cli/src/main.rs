//! Drover CLI - run the dashboard, run workers, and issue supervisor commands

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drover_core::config::DroverConfig;
use drover_core::db;
use drover_core::process::{ProcessInspector, SysinfoHostMemory, SysinfoInspector};
use drover_core::queue::{CommandTask, CommandTaskExecutor, SqliteTaskQueue, TaskQueue};
use drover_core::store::SqliteWorkerStore;
use drover_supervisor::{
    AdmissionController, CommandLauncher, LAUNCH_TOKEN_ENV, LoopSettings, RunMode, StatusReport,
    SupervisorSettings, WorkerProcess, WorkerSupervisor,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "Local worker-process supervisor", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (layered over drover.toml and under DROVER_* variables)
    #[arg(long, global = true, env = "DROVER_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the status and command surfaces over HTTP
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a worker control loop (normally started by the supervisor)
    Worker {
        /// Worker record to claim
        #[arg(long)]
        worker_id: String,
        /// server: drain at once if the record disappears; standalone: retry once first
        #[arg(long, default_value = "standalone")]
        mode: RunMode,
        /// Launch token of the record
        #[arg(long, env = LAUNCH_TOKEN_ENV, hide_env_values = true)]
        launch_token: String,
    },
    /// Admit and launch workers
    Spawn {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
        /// Bypass admission control
        #[arg(long)]
        force: bool,
    },
    /// Ask a running worker to finish its current task and exit
    Drain {
        /// Defaults to the longest-running worker
        #[arg(long)]
        worker_id: Option<String>,
    },
    /// Kill a worker immediately
    Abort {
        #[arg(long)]
        worker_id: String,
        /// Required; without it nothing happens
        #[arg(long)]
        confirm: bool,
    },
    /// Show workers, capacity and queue depth
    Status {
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// Queue a command task
    Enqueue {
        /// Program to run
        program: String,
        /// Program arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("drover {}", env!("CARGO_PKG_VERSION"));
        println!("drover-core {}", drover_core::VERSION);
        return Ok(());
    }

    let config = DroverConfig::load_with(cli.config.clone()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Version => {}
        Commands::Serve { bind } => {
            let supervisor = build_supervisor(&config, cli.config.as_ref()).await?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            serve(supervisor, &bind).await?;
        }
        Commands::Worker {
            worker_id,
            mode,
            launch_token,
        } => {
            run_worker(&config, worker_id, mode, &launch_token).await?;
        }
        Commands::Spawn { count, force } => {
            let supervisor = build_supervisor(&config, cli.config.as_ref()).await?;
            let report = supervisor.spawn_worker(count, force).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.spawned.is_empty() {
                anyhow::bail!("no worker admitted ({} rejected)", report.rejected);
            }
        }
        Commands::Drain { worker_id } => {
            let supervisor = build_supervisor(&config, cli.config.as_ref()).await?;
            let worker = supervisor.drain_worker(worker_id.as_deref()).await?;
            println!("{} is {}", worker.worker_id, worker.state);
        }
        Commands::Abort { worker_id, confirm } => {
            let supervisor = build_supervisor(&config, cli.config.as_ref()).await?;
            let report = supervisor.abort_worker(&worker_id, confirm).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status { json } => {
            let supervisor = build_supervisor(&config, cli.config.as_ref()).await?;
            let report = supervisor.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
        }
        Commands::Enqueue { program, args } => {
            let pool = db::connect(&config.database_url).await?;
            let queue = SqliteTaskQueue::new(pool);
            let payload = serde_json::to_value(CommandTask {
                program,
                args,
                working_dir: None,
            })?;
            let task_id = queue.enqueue(CommandTaskExecutor::KIND, payload).await?;
            println!("{}", task_id);
        }
    }

    Ok(())
}

async fn build_supervisor(
    config: &DroverConfig,
    config_path: Option<&PathBuf>,
) -> Result<Arc<WorkerSupervisor>> {
    let pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;

    let mut launcher = match config.supervisor.worker_binary {
        Some(ref binary) => CommandLauncher::new(binary)?,
        None => CommandLauncher::current_exe()?,
    };
    // Workers must read the same configuration file as their supervisor.
    if let Some(path) = config_path {
        launcher = launcher.with_env("DROVER_CONFIG_PATH", path.display().to_string());
    }

    Ok(Arc::new(WorkerSupervisor::new(
        Arc::new(SqliteWorkerStore::new(pool.clone())),
        Arc::new(SqliteTaskQueue::new(pool)),
        AdmissionController::new(config.admission.clone(), Arc::new(SysinfoHostMemory)),
        Arc::new(launcher),
        Arc::new(SysinfoInspector::new()),
        SupervisorSettings::from_config(config),
    )))
}

async fn serve(supervisor: Arc<WorkerSupervisor>, bind: &str) -> Result<()> {
    let reconciled = supervisor.reconcile().await?;
    if !reconciled.is_empty() {
        tracing::info!(
            startup_timeouts = reconciled.startup_timeouts.len(),
            lost_contact = reconciled.lost_contact.len(),
            "Reconciled stale workers at startup"
        );
    }

    let app = drover_supervisor::api::router(supervisor);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    tracing::info!("Drover dashboard listening on http://{}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_worker(
    config: &DroverConfig,
    worker_id: String,
    mode: RunMode,
    launch_token: &str,
) -> Result<()> {
    let pool = db::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;
    let identity = SysinfoInspector::new().current_identity().await?;

    let process = WorkerProcess::new(
        worker_id,
        Arc::new(SqliteWorkerStore::new(pool.clone())),
        Arc::new(SqliteTaskQueue::new(pool)),
        Arc::new(CommandTaskExecutor),
        LoopSettings::from_config(mode, &config.worker),
    );

    tokio::select! {
        exit = process.start(launch_token, identity) => {
            let exit = exit?;
            tracing::info!(
                worker_id = %process.worker_id(),
                tasks_completed = exit.tasks_completed,
                tasks_failed = exit.tasks_failed,
                "Worker exited"
            );
        }
        _ = shutdown_signal() => {
            tracing::warn!(worker_id = %process.worker_id(), "Worker interrupted without draining");
        }
    }

    Ok(())
}

fn print_status(report: &StatusReport) {
    println!(
        "capacity: {}/{} in flight (max {}), memory {} MB available of {} MB, queue depth {}",
        report.capacity.in_flight,
        report.capacity.admissible,
        report.capacity.max_workers,
        report.memory.available_mb,
        report.memory.total_mb,
        report.queue_depth,
    );
    println!();
    println!(
        "{:<40} {:<9} {:>8} {:>10} {:>8}",
        "WORKER", "STATE", "PID", "HEARTBEAT", "RSS MB"
    );

    for worker in &report.workers {
        let pid = worker.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        let beat = worker
            .heartbeat_age_secs
            .map(|s| format!("{}s ago", s))
            .unwrap_or_else(|| "-".into());
        let rss = worker
            .stats
            .as_ref()
            .map(|s| (s.rss_bytes / (1024 * 1024)).to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<40} {:<9} {:>8} {:>10} {:>8}",
            worker.worker_id,
            worker.state.as_str(),
            pid,
            beat,
            rss
        );
        if let Some(ref tail) = worker.last_error_tail {
            for line in tail.lines() {
                println!("    {}", line);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, gracefully shutting down...");
}
