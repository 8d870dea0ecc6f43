//! Parsing raw callback payloads forwarded by OS extension shims.
//!
//! The notification shim and the usage-monitor extension run outside the
//! daemon and forward whatever the platform handed them as JSON. This module
//! turns those payloads into typed events; deciding what they mean for the
//! session is the daemon's job.

use serde::Deserialize;
use shieldpass_core::Trigger;

// ============================================================================
// Notification callbacks
// ============================================================================

/// Raw notification callback JSON.
///
/// `kind` is one of `delivered`, `action`, `foreground_present`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNotificationCallback {
    pub kind: String,
    /// Notification request identifier (the session id it was armed for)
    pub identifier: String,
    #[serde(default)]
    pub action_identifier: Option<String>,
}

/// Typed notification callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationCallback {
    /// The notification reached the device (informational only)
    Delivered { id: String },
    /// The user interacted with the notification
    Action { id: String, action: String },
    /// The notification fired while the app was in the foreground
    ForegroundPresent { id: String },
}

impl NotificationCallback {
    pub fn id(&self) -> &str {
        match self {
            Self::Delivered { id } | Self::Action { id, .. } | Self::ForegroundPresent { id } => id,
        }
    }
}

impl RawNotificationCallback {
    /// Converts to a typed callback.
    ///
    /// An `action` callback without an action identifier is treated as the
    /// default action (the user tapped the notification body).
    pub fn to_callback(&self) -> Option<NotificationCallback> {
        let id = self.identifier.clone();
        match self.kind.as_str() {
            "delivered" => Some(NotificationCallback::Delivered { id }),
            "action" => Some(NotificationCallback::Action {
                id,
                action: self
                    .action_identifier
                    .clone()
                    .unwrap_or_else(|| "default".to_string()),
            }),
            "foreground_present" => Some(NotificationCallback::ForegroundPresent { id }),
            _ => None,
        }
    }
}

// ============================================================================
// Usage-monitor callbacks
// ============================================================================

/// Raw usage-monitor callback JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMonitorCallback {
    pub event: String,
    /// Monitoring activity name, usually the session id
    #[serde(default)]
    pub activity: Option<String>,
}

/// Usage-monitor events the extension can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    IntervalDidStart,
    IntervalWillEndWarning,
    IntervalDidEnd,
    ThresholdReached,
}

impl MonitorEvent {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "interval_did_start" => Some(Self::IntervalDidStart),
            "interval_will_end_warning" => Some(Self::IntervalWillEndWarning),
            "interval_did_end" => Some(Self::IntervalDidEnd),
            "event_did_reach_threshold" => Some(Self::ThresholdReached),
            _ => None,
        }
    }

    /// Returns the reconcile trigger for events that end a pause.
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Self::IntervalDidEnd | Self::ThresholdReached => Some(Trigger::MonitorCallback),
            Self::IntervalDidStart | Self::IntervalWillEndWarning => None,
        }
    }
}

impl RawMonitorCallback {
    pub fn event(&self) -> Option<MonitorEvent> {
        MonitorEvent::from_name(&self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_action_parsing() {
        let json = r#"{"kind": "action", "identifier": "abc", "action_identifier": "restore"}"#;
        let raw: RawNotificationCallback = serde_json::from_str(json).unwrap();
        assert_eq!(
            raw.to_callback(),
            Some(NotificationCallback::Action {
                id: "abc".to_string(),
                action: "restore".to_string()
            })
        );
    }

    #[test]
    fn test_notification_action_defaults() {
        let json = r#"{"kind": "action", "identifier": "abc"}"#;
        let raw: RawNotificationCallback = serde_json::from_str(json).unwrap();
        match raw.to_callback() {
            Some(NotificationCallback::Action { action, .. }) => assert_eq!(action, "default"),
            other => panic!("unexpected callback: {other:?}"),
        }
    }

    #[test]
    fn test_notification_unknown_kind() {
        let json = r#"{"kind": "snoozed", "identifier": "abc"}"#;
        let raw: RawNotificationCallback = serde_json::from_str(json).unwrap();
        assert_eq!(raw.to_callback(), None);
    }

    #[test]
    fn test_monitor_events() {
        let json = r#"{"event": "interval_did_end", "activity": "abc"}"#;
        let raw: RawMonitorCallback = serde_json::from_str(json).unwrap();
        assert_eq!(raw.event(), Some(MonitorEvent::IntervalDidEnd));
        assert_eq!(
            raw.event().and_then(|e| e.trigger()),
            Some(Trigger::MonitorCallback)
        );

        assert_eq!(MonitorEvent::IntervalWillEndWarning.trigger(), None);
        assert_eq!(MonitorEvent::from_name("bogus"), None);
    }
}
