//! Read-side aggregation over closed sessions and interactions.

use serde::{Deserialize, Serialize};

use crate::{InteractionEvent, RestorationMethod, Session, UserAction};

/// How closed sessions were restored.
///
/// `unattributed` covers timer expiry, the foreground failsafe and orphan
/// repair, none of which set a restoration flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodBreakdown {
    pub notification: u32,
    pub manual: u32,
    pub monitor: u32,
    pub unattributed: u32,
}

impl MethodBreakdown {
    fn count(&mut self, method: Option<RestorationMethod>) {
        let slot = match method {
            Some(RestorationMethod::NotificationTapped) => &mut self.notification,
            Some(RestorationMethod::Manual) => &mut self.manual,
            Some(RestorationMethod::Monitor) => &mut self.monitor,
            None => &mut self.unattributed,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Aggregate statistics over the session history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_sessions: u32,
    pub ended_early: u32,
    /// Sessions rebuilt by orphan repair
    pub reconstructed: u32,
    pub total_unblocked_secs: u64,
    pub average_unblocked_secs: u64,
    pub by_method: MethodBreakdown,
    pub items_logged_during: u32,
    pub items_logged_after: u32,
}

impl HistorySummary {
    /// Builds a summary from closed sessions. Open sessions are skipped.
    pub fn from_history(history: &[Session]) -> Self {
        let mut summary = Self::default();

        for session in history {
            let Some(duration) = session.actual_duration() else {
                continue;
            };
            summary.total_sessions += 1;
            if session.ended_early() {
                summary.ended_early += 1;
            }
            if session.id.is_synthetic() {
                summary.reconstructed += 1;
            }
            summary.total_unblocked_secs += duration.num_seconds().max(0) as u64;
            summary.by_method.count(session.restoration_method());
            summary.items_logged_during = summary
                .items_logged_during
                .saturating_add(session.items_logged_during);
            summary.items_logged_after = summary
                .items_logged_after
                .saturating_add(session.items_logged_after);
        }

        if summary.total_sessions > 0 {
            summary.average_unblocked_secs =
                summary.total_unblocked_secs / u64::from(summary.total_sessions);
        }
        summary
    }

    /// Adds follow-up item counts that were recorded after closure.
    #[must_use]
    pub fn with_items_after(mut self, extra: u32) -> Self {
        self.items_logged_after = self.items_logged_after.saturating_add(extra);
        self
    }
}

/// Aggregate statistics over shield appearances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionSummary {
    pub shown: u32,
    pub responded: u32,
    pub requested_pause: u32,
    pub kept_blocked: u32,
    pub dismissed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_response_ms: Option<i64>,
}

impl InteractionSummary {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a InteractionEvent>) -> Self {
        let mut summary = Self::default();
        let mut response_total: i64 = 0;

        for event in events {
            summary.shown += 1;
            match event.action {
                UserAction::None => {}
                UserAction::RequestedPause => summary.requested_pause += 1,
                UserAction::KeptBlocked => summary.kept_blocked += 1,
                UserAction::Dismissed => summary.dismissed += 1,
            }
            if let Some(ms) = event.response_duration_ms() {
                summary.responded += 1;
                response_total = response_total.saturating_add(ms);
            }
        }

        if summary.responded > 0 {
            summary.average_response_ms = Some(response_total / i64::from(summary.responded));
        }
        summary
    }
}
