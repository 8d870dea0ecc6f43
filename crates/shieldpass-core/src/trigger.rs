//! Wake-up paths that can ask the coordinator to close a session.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::RestorationMethod;

/// Which wake-up path invoked a reconcile.
///
/// Used for analytics attribution only. Every trigger takes the same
/// restoration path; none of them changes whether the shield goes back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The in-process countdown reached zero
    TimerExpired,

    /// The user acted on the scheduled notification, or it was presented
    /// while the app was in the foreground
    NotificationTapped,

    /// The user restored the shield by hand (including force-close on a new
    /// pause request)
    Manual,

    /// The OS usage monitor reported the interval ended
    MonitorCallback,

    /// Foreground pass found a session whose end time already passed
    ForegroundFailsafe,
}

impl Trigger {
    /// Returns the restoration-method flag this trigger is attributed to.
    ///
    /// Timer expiry and the foreground failsafe have no dedicated flag; a
    /// session closed by them records no method.
    pub fn restoration_method(&self) -> Option<RestorationMethod> {
        match self {
            Self::NotificationTapped => Some(RestorationMethod::NotificationTapped),
            Self::Manual => Some(RestorationMethod::Manual),
            Self::MonitorCallback => Some(RestorationMethod::Monitor),
            Self::TimerExpired | Self::ForegroundFailsafe => None,
        }
    }

    /// Parses from the snake_case tag used on the wire and the CLI.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "timer_expired" => Some(Self::TimerExpired),
            "notification_tapped" => Some(Self::NotificationTapped),
            "manual" => Some(Self::Manual),
            "monitor_callback" => Some(Self::MonitorCallback),
            "foreground_failsafe" => Some(Self::ForegroundFailsafe),
            _ => None,
        }
    }

    /// Returns the snake_case tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TimerExpired => "timer_expired",
            Self::NotificationTapped => "notification_tapped",
            Self::Manual => "manual",
            Self::MonitorCallback => "monitor_callback",
            Self::ForegroundFailsafe => "foreground_failsafe",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_tag_parsing() {
        assert_eq!(Trigger::from_tag("timer_expired"), Some(Trigger::TimerExpired));
        assert_eq!(
            Trigger::from_tag("monitor_callback"),
            Some(Trigger::MonitorCallback)
        );
        assert_eq!(Trigger::from_tag("Unknown"), None);
    }

    #[test]
    fn test_tag_matches_serde_name() {
        for trigger in [
            Trigger::TimerExpired,
            Trigger::NotificationTapped,
            Trigger::Manual,
            Trigger::MonitorCallback,
            Trigger::ForegroundFailsafe,
        ] {
            let json = serde_json::to_string(&trigger).unwrap();
            assert_eq!(json, format!("\"{}\"", trigger.tag()));
            assert_eq!(Trigger::from_tag(trigger.tag()), Some(trigger));
        }
    }

    #[test]
    fn test_restoration_method_mapping() {
        assert_eq!(Trigger::TimerExpired.restoration_method(), None);
        assert_eq!(Trigger::ForegroundFailsafe.restoration_method(), None);
        assert_eq!(
            Trigger::Manual.restoration_method(),
            Some(RestorationMethod::Manual)
        );
        assert_eq!(
            Trigger::MonitorCallback.restoration_method(),
            Some(RestorationMethod::Monitor)
        );
    }
}
