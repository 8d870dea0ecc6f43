//! Error types for the shieldpass command line.
//!
//! All error types use `thiserror` and carry enough context to tell the
//! user what to do next (start the daemon, upgrade one side, retry).
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line client errors.
#[derive(Error, Debug)]
pub enum CliError {
    /// Nothing is listening on the socket.
    #[error("Daemon is not running (no socket at {}). Start it with `shieldpassd start -d`", .0.display())]
    DaemonNotRunning(PathBuf),

    /// The daemon refused the handshake.
    #[error("Protocol version mismatch (client: {client_version}, daemon: {daemon_version})")]
    VersionMismatch {
        client_version: String,
        daemon_version: String,
    },

    /// The daemon answered a request with an error.
    ///
    /// `code` is the stable machine-readable reason, e.g.
    /// `persistence_unavailable` or `already_completed`.
    #[error("Daemon error: {message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// The daemon answered with a message this command does not expect.
    #[error("Unexpected reply from daemon: {0}")]
    UnexpectedReply(String),

    /// The daemon did not answer in time.
    #[error("Timed out waiting for daemon")]
    Timeout,

    /// The daemon closed the connection.
    #[error("Daemon closed the connection")]
    Disconnected,

    /// Bad command-line input (e.g. a callback payload that is not JSON).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The daemon could not be started.
    #[error("Failed to start daemon: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl CliError {
    /// Returns the daemon's error code, if this error came from the daemon.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Daemon { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Convenience Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;
