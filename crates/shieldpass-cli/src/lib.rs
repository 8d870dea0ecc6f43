//! Client library for the `shieldpass` command line.
//!
//! Talks to `shieldpassd` over its Unix socket and renders replies as
//! plain text. Extension shims use the same client to forward notification
//! and usage-monitor callbacks.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod client;
pub mod daemon;
pub mod error;
pub mod format;

pub use client::DaemonClient;
pub use error::{CliError, Result};

use std::path::PathBuf;

use shieldpass_protocol::{DEFAULT_SOCKET_PATH, SOCKET_ENV_VAR};

/// Resolves the socket path: explicit flag, then environment, then default.
pub fn resolve_socket_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(SOCKET_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_wins() {
        let path = resolve_socket_path(Some(PathBuf::from("/run/custom.sock")));
        assert_eq!(path, PathBuf::from("/run/custom.sock"));
    }
}
