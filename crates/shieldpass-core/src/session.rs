//! Session domain entities and value objects.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a temporary access session.
///
/// Wraps a UUID string generated when the pause is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// Prefix for sessions reconstructed by orphan repair.
pub const SYNTHETIC_SESSION_PREFIX: &str = "orphan-";

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates the id for a session rebuilt after a missed restoration.
    pub fn synthetic() -> Self {
        Self(format!("{SYNTHETIC_SESSION_PREFIX}{}", Uuid::new_v4()))
    }

    /// Checks if this id belongs to a reconstructed session.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(SYNTHETIC_SESSION_PREFIX)
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Phase
// ============================================================================

/// Lifecycle phase of a session relative to a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Shield is down and the scheduled end is still ahead.
    Active,

    /// Scheduled end has passed but nothing has restored the shield yet.
    ExpiredUnresolved,

    /// `actual_end_time` is set. Terminal.
    Closed,
}

impl SessionPhase {
    /// Returns the display label for this phase.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::ExpiredUnresolved => "expired",
            Self::Closed => "closed",
        }
    }

    /// Returns true while the session still needs a reconcile.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Restoration Method
// ============================================================================

/// Which of the write-once restoration flags closed the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorationMethod {
    NotificationTapped,
    Manual,
    Monitor,
}

impl fmt::Display for RestorationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotificationTapped => write!(f, "notification"),
            Self::Manual => write!(f, "manual"),
            Self::Monitor => write!(f, "monitor"),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// A time-boxed exception to the shield.
///
/// This is also the persisted record layout: the store writes it as-is for
/// the current slot and for every history entry.
///
/// Invariants upheld by the mutators below:
/// - `actual_end_time` is set at most once and never changed afterwards
/// - the boolean flags only ever go from `false` to `true`
/// - at most one restoration flag is set by `close`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    pub start_time: DateTime<Utc>,

    pub scheduled_end_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,

    /// What was unblocked (application or group name).
    #[serde(rename = "target")]
    pub target_name: String,

    #[serde(default)]
    pub notification_delivered: bool,

    #[serde(default)]
    pub notification_tapped: bool,

    #[serde(default)]
    pub restored_manually: bool,

    #[serde(default)]
    pub restored_by_monitor: bool,

    #[serde(default)]
    pub items_logged_during: u32,

    #[serde(default)]
    pub items_logged_after: u32,
}

impl Session {
    /// Creates a new active session starting at `start` and lasting `duration`.
    pub fn new(target_name: impl Into<String>, start: DateTime<Utc>, duration: Duration) -> Self {
        Self::with_id(SessionId::generate(), target_name, start, duration)
    }

    /// Like [`Session::new`], but rejects a duration whose end time falls
    /// outside the representable calendar instead of saturating it.
    pub fn try_new(
        target_name: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> DomainResult<Self> {
        if start.checked_add_signed(duration).is_none() {
            return Err(DomainError::InvalidFieldValue {
                field: "duration".to_string(),
                value: format!("{}s", duration.num_seconds()),
                expected: "an end time within the calendar range".to_string(),
            });
        }
        Ok(Self::new(target_name, start, duration))
    }

    /// Creates a session with a caller-chosen id.
    ///
    /// An end time past the calendar range saturates at its upper bound.
    pub fn with_id(
        id: SessionId,
        target_name: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            start_time: start,
            scheduled_end_time: start
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            actual_end_time: None,
            target_name: target_name.into(),
            notification_delivered: false,
            notification_tapped: false,
            restored_manually: false,
            restored_by_monitor: false,
            items_logged_during: 0,
            items_logged_after: 0,
        }
    }

    /// Returns the lifecycle phase as seen at `now`.
    pub fn phase(&self, now: DateTime<Utc>) -> SessionPhase {
        if self.actual_end_time.is_some() {
            SessionPhase::Closed
        } else if now < self.scheduled_end_time {
            SessionPhase::Active
        } else {
            SessionPhase::ExpiredUnresolved
        }
    }

    /// Returns true once `actual_end_time` is set.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.actual_end_time.is_some()
    }

    /// Time left until the scheduled end, never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let left = self.scheduled_end_time - now;
        if left < Duration::zero() {
            Duration::zero()
        } else {
            left
        }
    }

    /// Whole seconds left, rounded up so a display never shows 0 early.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let ms = self.remaining(now).num_milliseconds().max(0) as u64;
        ms.div_ceil(1000)
    }

    /// Length of the pause as requested.
    pub fn planned_duration(&self) -> Duration {
        self.scheduled_end_time - self.start_time
    }

    /// How long the shield was actually down. `None` while open.
    pub fn actual_duration(&self) -> Option<Duration> {
        self.actual_end_time.map(|end| end - self.start_time)
    }

    /// Returns true if the session closed before its scheduled end.
    #[must_use]
    pub fn ended_early(&self) -> bool {
        self.actual_end_time
            .map(|end| end < self.scheduled_end_time)
            .unwrap_or(false)
    }

    /// Returns the restoration method recorded on this session, if any.
    pub fn restoration_method(&self) -> Option<RestorationMethod> {
        if self.notification_tapped {
            Some(RestorationMethod::NotificationTapped)
        } else if self.restored_manually {
            Some(RestorationMethod::Manual)
        } else if self.restored_by_monitor {
            Some(RestorationMethod::Monitor)
        } else {
            None
        }
    }

    /// Closes the session at `now`.
    ///
    /// Sets `actual_end_time` only if unset and records `method` only if no
    /// method was recorded yet. Returns true if this call closed the session.
    pub fn close(&mut self, now: DateTime<Utc>, method: Option<RestorationMethod>) -> bool {
        if self.actual_end_time.is_some() {
            debug!(session_id = %self.id, "close ignored: already closed");
            return false;
        }
        self.actual_end_time = Some(now);

        if let Some(method) = method {
            if self.restoration_method().is_none() {
                match method {
                    RestorationMethod::NotificationTapped => self.notification_tapped = true,
                    RestorationMethod::Manual => self.restored_manually = true,
                    RestorationMethod::Monitor => self.restored_by_monitor = true,
                }
            }
        }
        true
    }

    /// Flags that the scheduled notification reached the device.
    pub fn mark_notification_delivered(&mut self) {
        self.notification_delivered = true;
    }

    /// Counts an item logged while the shield is down.
    pub fn record_item_logged(&mut self) {
        self.items_logged_during = self.items_logged_during.saturating_add(1);
    }
}

// ============================================================================
// Session View (for status display)
// ============================================================================

/// Read-only projection of a session at a point in time.
///
/// Sent to clients; never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub id_short: String,
    pub target: String,
    pub phase: SessionPhase,
    pub start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,
    pub remaining_secs: u64,
    /// "mm:ss" countdown label
    pub remaining_display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restoration_method: Option<RestorationMethod>,
    pub notification_delivered: bool,
}

impl SessionView {
    /// Creates a view of `session` as seen at `now`.
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        let remaining_secs = if session.is_closed() {
            0
        } else {
            session.remaining_secs(now)
        };
        Self {
            id: session.id.clone(),
            id_short: session.id.short().to_string(),
            target: session.target_name.clone(),
            phase: session.phase(now),
            start_time: session.start_time,
            scheduled_end_time: session.scheduled_end_time,
            actual_end_time: session.actual_end_time,
            remaining_secs,
            remaining_display: format_clock(remaining_secs),
            restoration_method: session.restoration_method(),
            notification_delivered: session.notification_delivered,
        }
    }
}

// ============================================================================
// Formatting helpers
// ============================================================================

/// Formats seconds as a countdown clock: "9:05", "1:02:03".
pub fn format_clock(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Formats seconds for humans: "35s", "2m 15s", "1h 30m".
pub fn format_duration_secs(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem = secs % 60;
        if rem == 0 {
            format!("{mins}m")
        } else {
            format!("{mins}m {rem}s")
        }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{hours}h {mins}m")
    }
}
