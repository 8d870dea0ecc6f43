//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use serde::{Deserialize, Serialize};
use shieldpass_core::{
    HistorySummary, InteractionId, InteractionSummary, SessionView, Trigger, UserAction,
};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Request a temporary pause of the shield
    StartSession {
        /// Defaults to the first configured target
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        /// Defaults to the configured pause length
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u64>,
    },

    /// Put the shield back before the pause ends
    RestoreEarly,

    /// Generic wake-up path (attribution only)
    Reconcile { trigger: Trigger },

    /// Raw notification callback forwarded by the notification shim
    NotificationCallback { data: serde_json::Value },

    /// Raw usage-monitor callback forwarded by the monitor extension
    MonitorCallback { data: serde_json::Value },

    /// The app became active: run orphan detection and the failsafe pass
    Foreground,

    /// Request current shield/session state
    Status,

    /// Request closed sessions, newest last
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Request aggregated statistics
    Summary,

    /// The user logged an item (during a pause or shortly after)
    LogItem,

    /// The shield was displayed over a target
    ShieldShown {
        target: String,
        #[serde(default)]
        streak_days: u32,
    },

    /// The user responded to a shield appearance
    InteractionResponse {
        interaction_id: InteractionId,
        action: UserAction,
    },

    /// Subscribe to session lifecycle events
    Subscribe,

    /// Ping to check connection
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn start_session(target: Option<String>, duration_secs: Option<u64>) -> Self {
        Self::new(MessageType::StartSession {
            target,
            duration_secs,
        })
    }

    pub fn restore_early() -> Self {
        Self::new(MessageType::RestoreEarly)
    }

    pub fn reconcile(trigger: Trigger) -> Self {
        Self::new(MessageType::Reconcile { trigger })
    }

    pub fn notification_callback(data: serde_json::Value) -> Self {
        Self::new(MessageType::NotificationCallback { data })
    }

    pub fn monitor_callback(data: serde_json::Value) -> Self {
        Self::new(MessageType::MonitorCallback { data })
    }

    pub fn foreground() -> Self {
        Self::new(MessageType::Foreground)
    }

    pub fn status() -> Self {
        Self::new(MessageType::Status)
    }

    pub fn history(limit: Option<usize>) -> Self {
        Self::new(MessageType::History { limit })
    }

    pub fn summary() -> Self {
        Self::new(MessageType::Summary)
    }

    pub fn log_item() -> Self {
        Self::new(MessageType::LogItem)
    }

    pub fn shield_shown(target: impl Into<String>, streak_days: u32) -> Self {
        Self::new(MessageType::ShieldShown {
            target: target.into(),
            streak_days,
        })
    }

    pub fn interaction_response(interaction_id: InteractionId, action: UserAction) -> Self {
        Self::new(MessageType::InteractionResponse {
            interaction_id,
            action,
        })
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Shield and session state as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldStatus {
    /// What the Restriction Enforcer currently reports
    pub blocked: bool,
    /// The current session, if one is recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionView>,
}

impl ShieldStatus {
    /// Returns "active" while a session is recorded, "idle" otherwise.
    pub fn state_label(&self) -> &'static str {
        if self.session.is_some() {
            "active"
        } else {
            "idle"
        }
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Current shield state
    Status { status: ShieldStatus },

    /// A pause began (reply to StartSession, also broadcast)
    SessionStarted { session: Box<SessionView> },

    /// A session was closed and the shield re-applied (broadcast)
    SessionClosed { session: Box<SessionView> },

    /// Reply to any reconcile-style request.
    ///
    /// `closed` is `None` when there was nothing to close, which is the
    /// normal outcome for every trigger after the first.
    Reconciled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        closed: Option<Box<SessionView>>,
    },

    /// Reply to Foreground
    ForegroundChecked {
        orphan_repaired: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        closed: Option<Box<SessionView>>,
    },

    /// A missing restoration was detected and repaired (broadcast)
    OrphanRepaired { session: Box<SessionView> },

    /// Closed sessions
    History { sessions: Vec<SessionView> },

    /// Aggregated statistics
    Summary {
        history: HistorySummary,
        interactions: InteractionSummary,
    },

    /// Reply to ShieldShown
    InteractionRecorded { interaction_id: InteractionId },

    /// Generic success without payload
    Ack,

    /// Pong response to ping
    Pong { seq: u64 },

    /// Error response
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn status(status: ShieldStatus) -> Self {
        Self::Status { status }
    }

    pub fn session_started(session: SessionView) -> Self {
        Self::SessionStarted {
            session: Box::new(session),
        }
    }

    pub fn session_closed(session: SessionView) -> Self {
        Self::SessionClosed {
            session: Box::new(session),
        }
    }

    pub fn reconciled(closed: Option<SessionView>) -> Self {
        Self::Reconciled {
            closed: closed.map(Box::new),
        }
    }

    pub fn foreground_checked(orphan_repaired: bool, closed: Option<SessionView>) -> Self {
        Self::ForegroundChecked {
            orphan_repaired,
            closed: closed.map(Box::new),
        }
    }

    pub fn orphan_repaired(session: SessionView) -> Self {
        Self::OrphanRepaired {
            session: Box::new(session),
        }
    }

    pub fn history(sessions: Vec<SessionView>) -> Self {
        Self::History { sessions }
    }

    pub fn summary(history: HistorySummary, interactions: InteractionSummary) -> Self {
        Self::Summary {
            history,
            interactions,
        }
    }

    pub fn interaction_recorded(interaction_id: InteractionId) -> Self {
        Self::InteractionRecorded { interaction_id }
    }

    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}
