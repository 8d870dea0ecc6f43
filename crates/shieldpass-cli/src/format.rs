//! Plain-text rendering of daemon replies.

use std::fmt::Write;

use chrono::{DateTime, Local, Utc};
use shieldpass_core::{
    format_duration_secs, HistorySummary, InteractionSummary, SessionPhase, SessionView,
};
use shieldpass_protocol::{DaemonMessage, ShieldStatus};

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn local_date_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// One line describing a session as of the view's snapshot.
pub fn session_line(view: &SessionView) -> String {
    match view.phase {
        SessionPhase::Active => format!(
            "{} paused, {} left (until {})",
            view.target,
            view.remaining_display,
            local_time(view.scheduled_end_time)
        ),
        SessionPhase::ExpiredUnresolved => format!(
            "{} pause expired at {}, waiting for restoration",
            view.target,
            local_time(view.scheduled_end_time)
        ),
        SessionPhase::Closed => {
            let how = view
                .restoration_method
                .map_or_else(|| "automatically".to_string(), |m| format!("by {m}"));
            format!("{} restored {how}", view.target)
        }
    }
}

/// Status block for `shieldpass status`.
pub fn status_report(status: &ShieldStatus) -> String {
    let shield = if status.blocked { "up" } else { "down" };
    let mut out = format!("Shield: {shield} ({})\n", status.state_label());
    if let Some(view) = &status.session {
        let _ = writeln!(out, "Session: {}", view.id_short);
        let _ = writeln!(out, "{}", session_line(view));
    }
    out
}

/// Table of closed sessions, oldest first.
pub fn history_table(sessions: &[SessionView]) -> String {
    if sessions.is_empty() {
        return "No sessions yet\n".to_string();
    }

    let mut out = format!(
        "{:<10} {:<16} {:<16} {:>9} {:<13}\n",
        "ID", "TARGET", "STARTED", "LASTED", "RESTORED BY"
    );
    for view in sessions {
        let lasted = view
            .actual_end_time
            .map(|end| (end - view.start_time).num_seconds().max(0) as u64)
            .map_or_else(|| "-".to_string(), format_duration_secs);
        let method = view
            .restoration_method
            .map_or_else(|| "-".to_string(), |m| m.to_string());
        let _ = writeln!(
            out,
            "{:<10} {:<16} {:<16} {:>9} {:<13}",
            view.id_short,
            view.target,
            local_date_time(view.start_time),
            lasted,
            method
        );
    }
    out
}

/// Report for `shieldpass summary`.
pub fn summary_report(history: &HistorySummary, interactions: &InteractionSummary) -> String {
    let mut out = String::from("Pauses\n");
    let _ = writeln!(out, "  total:            {}", history.total_sessions);
    let _ = writeln!(out, "  ended early:      {}", history.ended_early);
    let _ = writeln!(out, "  repaired:         {}", history.reconstructed);
    let _ = writeln!(
        out,
        "  time unblocked:   {} (avg {})",
        format_duration_secs(history.total_unblocked_secs),
        format_duration_secs(history.average_unblocked_secs)
    );
    let m = &history.by_method;
    let _ = writeln!(
        out,
        "  restored by:      notification {}, manual {}, monitor {}, timer/failsafe {}",
        m.notification, m.manual, m.monitor, m.unattributed
    );
    let _ = writeln!(
        out,
        "  items logged:     {} during, {} after",
        history.items_logged_during, history.items_logged_after
    );

    out.push_str("Shield appearances\n");
    let _ = writeln!(out, "  shown:            {}", interactions.shown);
    let _ = writeln!(
        out,
        "  responses:        {} (paused {}, kept blocked {}, dismissed {})",
        interactions.responded,
        interactions.requested_pause,
        interactions.kept_blocked,
        interactions.dismissed
    );
    if let Some(ms) = interactions.average_response_ms {
        let _ = writeln!(out, "  avg response:     {:.1}s", ms as f64 / 1000.0);
    }
    out
}

/// Short human line for any reply the CLI prints directly.
pub fn reply_line(reply: &DaemonMessage) -> String {
    match reply {
        DaemonMessage::SessionStarted { session } => session_line(session),
        DaemonMessage::SessionClosed { session } => session_line(session),
        DaemonMessage::Reconciled { closed: Some(session) } => session_line(session),
        DaemonMessage::Reconciled { closed: None } => "Nothing to restore".to_string(),
        DaemonMessage::ForegroundChecked {
            orphan_repaired,
            closed,
        } => {
            let mut parts = Vec::new();
            if *orphan_repaired {
                parts.push("repaired a missed restoration".to_string());
            }
            if let Some(session) = closed {
                parts.push(session_line(session));
            }
            if parts.is_empty() {
                "All consistent".to_string()
            } else {
                parts.join("; ")
            }
        }
        DaemonMessage::OrphanRepaired { session } => {
            format!("Repaired missed restoration for {}", session.target)
        }
        DaemonMessage::Status { status } => status_report(status).trim_end().to_string(),
        DaemonMessage::InteractionRecorded { interaction_id } => interaction_id.to_string(),
        DaemonMessage::Ack => "OK".to_string(),
        DaemonMessage::Pong { seq } => format!("pong {seq}"),
        other => format!("{other:?}"),
    }
}
