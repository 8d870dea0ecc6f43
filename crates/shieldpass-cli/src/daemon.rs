//! Locating and auto-starting the daemon.
//!
//! Commands that change shield state start `shieldpassd` on demand, so a
//! pause requested right after login still goes through the coordinator.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use shieldpass_protocol::SOCKET_ENV_VAR;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{CliError, Result};

/// Time between socket checks while waiting for a fresh daemon.
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// Number of checks before giving up (3 seconds).
const STARTUP_ATTEMPTS: u32 = 30;

/// Path of the daemon PID file, shared by `shieldpassd` and the CLI.
pub fn pid_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("shieldpass")
        .join("shieldpassd.pid")
}

/// Reads a PID file; `None` if it is missing or garbled.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Checks whether a process with `pid` exists.
pub fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// True when the PID file names a live process.
pub fn is_daemon_running() -> bool {
    read_pid(&pid_file_path()).is_some_and(is_process_running)
}

/// Finds the daemon binary next to the current executable, else on `PATH`.
fn daemon_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("shieldpassd")))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("shieldpassd"))
}

/// Starts the daemon if its socket is not there yet and waits for it.
///
/// # Errors
///
/// `Spawn` if the binary could not be launched or the socket never appeared.
pub async fn ensure_daemon_running(socket_path: &Path) -> Result<()> {
    if socket_path.exists() && is_daemon_running() {
        debug!("Daemon already running");
        return Ok(());
    }

    if socket_path.exists() {
        // Left behind by a daemon that died; the new one binds afresh
        let _ = fs::remove_file(socket_path);
    }

    let binary = daemon_binary();
    info!(path = %binary.display(), "Daemon not running, starting it");

    Command::new(&binary)
        .args(["start", "-d"])
        .env(SOCKET_ENV_VAR, socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| CliError::Spawn(format!("{}: {e}", binary.display())))?;

    for attempt in 1..=STARTUP_ATTEMPTS {
        sleep(STARTUP_POLL).await;
        if socket_path.exists() {
            info!(attempts = attempt, "Daemon started");
            return Ok(());
        }
    }

    Err(CliError::Spawn(format!(
        "socket {} did not appear within 3 seconds",
        socket_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_path() {
        let path = pid_file_path();
        assert!(path.ends_with("shieldpass/shieldpassd.pid"));
    }

    #[test]
    fn test_read_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.pid");
        assert_eq!(read_pid(&path), None);

        fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));

        fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(999_999_999));
    }
}
