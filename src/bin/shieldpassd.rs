//! shieldpass daemon - session coordinator and socket server
//!
//! Owns the pause lifecycle: records sessions, lifts and re-applies the
//! shield, drives the countdown and the scheduled notification, and repairs
//! missed restorations on startup.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! shieldpassd start
//!
//! # Start the daemon (background/daemonized)
//! shieldpassd start -d
//!
//! # Stop the daemon
//! shieldpassd stop
//!
//! # Check daemon status
//! shieldpassd status
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shieldpass_cli::daemon::{is_process_running, pid_file_path, read_pid};
use shieldpass_core::{Clock, SystemClock};
use shieldpassd::analytics::JsonlRecorder;
use shieldpassd::collaborators::{
    CountdownSurface, FileCountdownSurface, ScheduledNotifier, ShieldFileEnforcer,
};
use shieldpassd::config::Config;
use shieldpassd::coordinator::{spawn_coordinator, spawn_notification_router, Collaborators};
use shieldpassd::server::DaemonServer;
use shieldpassd::store::JsonFileStore;

/// shieldpass daemon - time-boxed pauses for an app shield
#[derive(Parser, Debug)]
#[command(name = "shieldpassd", version, about)]
struct Args {
    /// Config file (default: ~/.config/shieldpass/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn log_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("shieldpass")
        .join("shieldpassd.log")
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// PID of the running daemon; clears a stale PID file.
fn running_daemon() -> Option<u32> {
    let pid = read_pid(&pid_file_path())?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = i32::try_from(pid).context("PID out of range")?;
        // SAFETY: kill(2) with a plain PID and signal number has no memory effects
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };
    config.context("Failed to load configuration")
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command.unwrap_or(Command::Start { daemon: false }) {
        Command::Start { daemon } => {
            if let Some(pid) = running_daemon() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'shieldpassd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = running_daemon() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {pid})...");
            stop_daemon(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = running_daemon() else {
                println!("Daemon is not running.");
                process::exit(1);
            };

            println!("Daemon is running (PID {pid})");
            let socket_path = config.socket_path();
            if socket_path.exists() {
                println!("Socket: {}", socket_path.display());
            }
            println!("Data: {}", config.data_dir().display());
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("shieldpassd=info".parse()?)
                .add_directive("shieldpass_core=info".parse()?)
                .add_directive("shieldpass_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "shieldpass daemon starting"
    );

    if config.targets.is_empty() {
        warn!("No targets configured; pauses need an explicit --target");
    }

    let data_dir = config.data_dir();
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (callback_tx, callback_rx) = mpsc::unbounded_channel();

    let surface: Option<Arc<dyn CountdownSurface>> = if config.countdown_surface {
        Some(Arc::new(FileCountdownSurface::new(config.countdown_path())))
    } else {
        None
    };

    let collaborators = Collaborators {
        store: Box::new(JsonFileStore::open(&data_dir).context("Failed to open session store")?),
        enforcer: Box::new(
            ShieldFileEnforcer::open(
                config.shield_state_path(),
                &config.targets,
                config.enforcer_hook.clone(),
            )
            .context("Failed to open shield state")?,
        ),
        surface,
        notifier: Box::new(ScheduledNotifier::new(
            Arc::clone(&clock),
            callback_tx,
            config.notify_command.clone(),
        )),
        analytics: Box::new(JsonlRecorder::new(config.analytics_path())),
        clock: Arc::clone(&clock),
    };

    let coordinator = spawn_coordinator(collaborators, config.coordinator_settings());
    spawn_notification_router(&coordinator, callback_rx);
    info!(data_dir = %data_dir.display(), "Session coordinator started");

    // A daemon start is the process-level foreground event
    match coordinator.on_foreground().await {
        Ok(report) => {
            if let Some(orphan) = &report.orphan {
                warn!(session_id = %orphan.id, "Repaired missed restoration at startup");
            }
            if let Some(closed) = &report.closed {
                info!(session_id = %closed.id, "Closed expired session at startup");
            }
            if let Some(resumed) = &report.resumed {
                info!(session_id = %resumed.id, "Resumed running pause");
            }
        }
        Err(e) => error!(error = %e, "Startup consistency pass failed"),
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let socket_path = config.socket_path();
    let server = DaemonServer::new(&socket_path, coordinator, clock, cancel_token);
    info!(socket = %socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("shieldpass daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
