//! shieldpass Protocol - Wire protocol for daemon communication
//!
//! This crate provides message types and parsing for communication
//! between the CLI, OS extension shims (notification and usage-monitor
//! callbacks) and the daemon. Messages are newline-delimited JSON.

pub mod message;
pub mod parse;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType, ShieldStatus};
pub use parse::{MonitorEvent, NotificationCallback, RawMonitorCallback, RawNotificationCallback};
pub use version::ProtocolVersion;

/// Default socket path for daemon communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/shieldpass.sock";

/// Environment variable that overrides the socket path.
pub const SOCKET_ENV_VAR: &str = "SHIELDPASS_SOCKET";
