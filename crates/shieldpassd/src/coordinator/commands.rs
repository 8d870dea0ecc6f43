//! Coordinator commands, errors, and events.

use std::time::Duration;

use shieldpass_core::{
    DomainError, HistorySummary, InteractionEvent, InteractionId, InteractionSummary, Session,
    SessionId, Trigger, UserAction,
};
use shieldpass_protocol::{NotificationCallback, ShieldStatus};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Coordinator Commands
// ============================================================================

/// Commands sent to the coordinator actor.
///
/// Requests carry a oneshot `respond_to`; fire-and-forget commands (the
/// countdown driver's expiry, notifier callbacks) may leave it `None`.
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Begin a pause. Force-closes any session still recorded.
    ///
    /// # Errors
    /// - `CoordinatorError::PersistenceUnavailable` if the session could not
    ///   be recorded; the shield stays up
    StartSession {
        target: Option<String>,
        duration: Option<Duration>,
        respond_to: oneshot::Sender<Result<Session, CoordinatorError>>,
    },

    /// Close the current session and re-apply the shield.
    ///
    /// With `expected` set, the call only acts if the current session has
    /// that id; a late trigger for an earlier session is a no-op.
    Reconcile {
        trigger: Trigger,
        expected: Option<SessionId>,
        respond_to: Option<oneshot::Sender<Result<Option<Session>, CoordinatorError>>>,
    },

    /// A notification callback routed from the notifier or a shim.
    NotificationCallback {
        callback: NotificationCallback,
        respond_to: Option<oneshot::Sender<Result<Option<Session>, CoordinatorError>>>,
    },

    /// Repair a restoration that never happened.
    DetectOrphan {
        respond_to: oneshot::Sender<Result<Option<Session>, CoordinatorError>>,
    },

    /// Foreground pass: orphan check, expiry failsafe, driver resync.
    Foreground {
        respond_to: oneshot::Sender<Result<ForegroundReport, CoordinatorError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ShieldStatus>,
    },

    /// Closed sessions, oldest first, limited to the last `limit`.
    GetHistory {
        limit: Option<usize>,
        respond_to: oneshot::Sender<Result<Vec<Session>, CoordinatorError>>,
    },

    GetSummary {
        respond_to: oneshot::Sender<Result<(HistorySummary, InteractionSummary), CoordinatorError>>,
    },

    LogItem {
        respond_to: oneshot::Sender<Result<LogItemOutcome, CoordinatorError>>,
    },

    ShieldShown {
        target: String,
        streak_days: u32,
        respond_to: oneshot::Sender<Result<InteractionId, CoordinatorError>>,
    },

    /// Complete an interaction. Only the first response counts.
    RespondInteraction {
        id: InteractionId,
        action: UserAction,
        respond_to: oneshot::Sender<Result<InteractionEvent, CoordinatorError>>,
    },
}

/// What a foreground pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundReport {
    /// Synthetic session recorded by orphan repair
    pub orphan: Option<Session>,
    /// Session closed by the expiry failsafe
    pub closed: Option<Session>,
    /// An active session whose countdown was (re)attached
    pub resumed: Option<Session>,
}

/// Where a logged item was counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogItemOutcome {
    /// Counted on the current session
    During(SessionId),
    /// Counted against a session closed within the follow-up window
    After(SessionId),
    /// No session to attribute it to
    Untracked,
}

// ============================================================================
// Coordinator Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    /// The store could not record the change. On start, the shield was
    /// never lowered.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("restriction enforcer failed: {0}")]
    Enforcer(String),

    /// No target was given and none is configured.
    #[error("no target configured")]
    NoTarget,

    #[error("interaction not found: {0}")]
    InteractionNotFound(InteractionId),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("analytics unavailable: {0}")]
    Analytics(String),

    /// The actor has shut down.
    #[error("coordinator channel closed")]
    ChannelClosed,
}

impl CoordinatorError {
    /// Stable code for wire error replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PersistenceUnavailable(_) => "persistence_unavailable",
            Self::Enforcer(_) => "enforcer_failed",
            Self::NoTarget => "no_target",
            Self::InteractionNotFound(_) => "interaction_not_found",
            Self::Domain(DomainError::InteractionAlreadyCompleted { .. }) => "already_completed",
            Self::Domain(_) => "invalid_request",
            Self::Analytics(_) => "analytics_unavailable",
            Self::ChannelClosed => "unavailable",
        }
    }
}

// ============================================================================
// Coordinator Events
// ============================================================================

/// Lifecycle events broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Started { session: Box<Session> },
    Closed { session: Box<Session>, trigger: Trigger },
    OrphanRepaired { session: Box<Session> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinatorError::PersistenceUnavailable("disk full".to_string());
        assert_eq!(err.to_string(), "persistence unavailable: disk full");
        assert_eq!(CoordinatorError::ChannelClosed.to_string(), "coordinator channel closed");
    }

    #[test]
    fn test_error_codes() {
        let err = CoordinatorError::from(DomainError::InteractionAlreadyCompleted {
            id: InteractionId::new("abc"),
        });
        assert_eq!(err.code(), "already_completed");
        assert_eq!(CoordinatorError::NoTarget.code(), "no_target");
    }
}
