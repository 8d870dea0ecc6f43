//! Orphan reconstruction.
//!
//! An orphan is a pause whose restoration never happened: no session is
//! recorded yet the enforcer reports the block is down (the record was lost
//! or the block was lifted outside the coordinator). The coordinator puts
//! the block back and files a best-guess history entry so statistics still
//! account for the unblocked time.

use chrono::{DateTime, Duration, Utc};
use shieldpass_core::{Session, SessionId};

/// Target name used when nothing better is known.
pub const UNKNOWN_TARGET: &str = "unknown";

/// Builds a closed synthetic session ending at `now`.
///
/// - target: the last recorded session's, else `fallback_target`
/// - start: `now` minus the last session's planned length (or
///   `default_duration`), but never before the last session ended
/// - no restoration method is recorded
pub fn reconstruct(
    history: &[Session],
    fallback_target: Option<&str>,
    default_duration: Duration,
    now: DateTime<Utc>,
) -> Session {
    let last = history.last();

    let target = last
        .map(|s| s.target_name.as_str())
        .or(fallback_target)
        .unwrap_or(UNKNOWN_TARGET);

    let guess = last
        .map(Session::planned_duration)
        .filter(|d| *d > Duration::zero())
        .unwrap_or(default_duration);

    let mut start = now - guess;
    if let Some(last_end) = last.and_then(|s| s.actual_end_time) {
        if last_end > start {
            start = last_end.min(now);
        }
    }

    let mut session = Session::with_id(SessionId::synthetic(), target, start, now - start);
    session.close(now, None);
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruct_without_history() {
        let now = Utc::now();
        let session = reconstruct(&[], Some("ShopApp"), Duration::minutes(5), now);

        assert!(session.id.is_synthetic());
        assert_eq!(session.target_name, "ShopApp");
        assert_eq!(session.start_time, now - Duration::minutes(5));
        assert_eq!(session.actual_end_time, Some(now));
        assert_eq!(session.restoration_method(), None);
        assert!(!session.ended_early());
    }

    #[test]
    fn test_reconstruct_uses_last_session() {
        let now = Utc::now();
        let mut last = Session::new("Social", now - Duration::hours(3), Duration::minutes(15));
        last.close(now - Duration::hours(3) + Duration::minutes(15), None);

        let session = reconstruct(&[last], Some("ShopApp"), Duration::minutes(5), now);
        assert_eq!(session.target_name, "Social");
        assert_eq!(session.planned_duration(), Duration::minutes(15));
    }

    #[test]
    fn test_reconstruct_never_overlaps_last_session() {
        let now = Utc::now();
        let mut last = Session::new("Social", now - Duration::minutes(12), Duration::minutes(10));
        last.close(now - Duration::minutes(2), None);

        let session = reconstruct(&[last], None, Duration::minutes(5), now);
        assert_eq!(session.start_time, now - Duration::minutes(2));
        assert_eq!(session.actual_end_time, Some(now));
    }

    #[test]
    fn test_reconstruct_unknown_target() {
        let session = reconstruct(&[], None, Duration::minutes(5), Utc::now());
        assert_eq!(session.target_name, UNKNOWN_TARGET);
    }
}
