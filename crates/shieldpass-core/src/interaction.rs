//! Shield interaction records.
//!
//! One `InteractionEvent` is created every time the shield is shown. If the
//! user responds, the event is completed exactly once with the action they
//! took; otherwise it stays appearance-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{DomainError, DomainResult};

/// Unique identifier for a shield appearance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(String);

impl InteractionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InteractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the user did when the shield appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    /// No response recorded (appearance only)
    #[default]
    None,
    /// Asked for a temporary pause
    RequestedPause,
    /// Chose to stay blocked
    KeptBlocked,
    /// Closed the shield without choosing
    Dismissed,
}

impl UserAction {
    /// Parses from the snake_case tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "none" => Some(Self::None),
            "requested_pause" => Some(Self::RequestedPause),
            "kept_blocked" => Some(Self::KeptBlocked),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RequestedPause => "requested_pause",
            Self::KeptBlocked => "kept_blocked",
            Self::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single shield appearance and the user's (optional) response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: InteractionId,
    pub shown_at: DateTime<Utc>,
    pub target_name: String,
    /// Consecutive days kept blocked, as known when the shield was shown
    pub streak_days: u32,
    #[serde(default)]
    pub action: UserAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl InteractionEvent {
    /// Records a shield appearance.
    pub fn shown(target_name: impl Into<String>, streak_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: InteractionId::generate(),
            shown_at: now,
            target_name: target_name.into(),
            streak_days,
            action: UserAction::None,
            responded_at: None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.responded_at.is_some()
    }

    /// Time between appearance and response, in milliseconds.
    pub fn response_duration_ms(&self) -> Option<i64> {
        self.responded_at
            .map(|at| (at - self.shown_at).num_milliseconds().max(0))
    }

    /// Completes the interaction with the user's action.
    ///
    /// # Errors
    ///
    /// - `InteractionAlreadyCompleted` on a second call
    /// - `InvalidFieldValue` if `action` is `UserAction::None`
    pub fn complete(&mut self, action: UserAction, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_completed() {
            return Err(DomainError::InteractionAlreadyCompleted {
                id: self.id.clone(),
            });
        }
        if action == UserAction::None {
            return Err(DomainError::InvalidFieldValue {
                field: "action".to_string(),
                value: action.to_string(),
                expected: "requested_pause, kept_blocked or dismissed".to_string(),
            });
        }
        self.action = action;
        self.responded_at = Some(now);
        Ok(())
    }
}
