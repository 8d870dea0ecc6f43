//! Coordinator actor - sole writer of session state.
//!
//! Every wake-up path (countdown expiry, notification callbacks, monitor
//! callbacks, manual restore, the foreground failsafe) arrives here as a
//! command and is processed one at a time, so the read-current / close /
//! clear-current sequence can never interleave with itself.
//!
//! # Restoration order
//!
//! `reconcile` always runs, in this order:
//! 1. read the current session (none: no-op)
//! 2. apply the block
//! 3. close the session once, recording the trigger's method
//! 4. end the countdown, cancel the pending notification
//! 5. append to history, then clear current
//! 6. record analytics
//!
//! The block goes up before anything that can fail on persistence.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` outside tests
//! - Collaborator failures are logged or returned, never panicked on
//! - Responses to dropped receivers are ignored

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use shieldpass_core::{
    Clock, HistorySummary, InteractionEvent, InteractionId, InteractionSummary, Session,
    SessionId, SessionPhase, SessionView, Trigger, UserAction,
};
use shieldpass_protocol::{NotificationCallback, ShieldStatus};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::commands::{
    CoordinatorCommand, CoordinatorError, CoordinatorEvent, ForegroundReport, LogItemOutcome,
};
use crate::analytics::{count_items_after, fold_interactions, AnalyticsRecord, AnalyticsRecorder};
use crate::collaborators::{
    CountdownSurface, NotificationPayload, Notifier, RestrictionEnforcer, SurfaceError,
};
use crate::config::CoordinatorSettings;
use crate::countdown::CountdownDriver;
use crate::orphan;
use crate::store::{SessionStore, StoreError};

/// Everything the coordinator drives.
pub struct Collaborators {
    pub store: Box<dyn SessionStore>,
    pub enforcer: Box<dyn RestrictionEnforcer>,
    /// `None` where no countdown display exists
    pub surface: Option<Arc<dyn CountdownSurface>>,
    pub notifier: Box<dyn Notifier>,
    pub analytics: Box<dyn AnalyticsRecorder>,
    pub clock: Arc<dyn Clock>,
}

fn persistence(err: StoreError) -> CoordinatorError {
    CoordinatorError::PersistenceUnavailable(err.to_string())
}

// ============================================================================
// Coordinator Actor
// ============================================================================

pub struct CoordinatorActor {
    receiver: mpsc::Receiver<CoordinatorCommand>,

    /// Handed to countdown drivers so expiry comes back through the queue
    self_sender: mpsc::WeakSender<CoordinatorCommand>,

    event_publisher: broadcast::Sender<CoordinatorEvent>,

    store: Box<dyn SessionStore>,
    enforcer: Box<dyn RestrictionEnforcer>,
    surface: Option<Arc<dyn CountdownSurface>>,
    notifier: Box<dyn Notifier>,
    analytics: Box<dyn AnalyticsRecorder>,
    clock: Arc<dyn Clock>,

    settings: CoordinatorSettings,

    /// At most one countdown at a time
    driver: Option<CountdownDriver>,
}

impl CoordinatorActor {
    pub fn new(
        receiver: mpsc::Receiver<CoordinatorCommand>,
        self_sender: mpsc::WeakSender<CoordinatorCommand>,
        event_publisher: broadcast::Sender<CoordinatorEvent>,
        collaborators: Collaborators,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            event_publisher,
            store: collaborators.store,
            enforcer: collaborators.enforcer,
            surface: collaborators.surface,
            notifier: collaborators.notifier,
            analytics: collaborators.analytics,
            clock: collaborators.clock,
            settings,
            driver: None,
        }
    }

    /// Processes commands until every sender is dropped.
    pub async fn run(mut self) {
        info!("Coordinator actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        self.stop_driver();
        info!("Coordinator actor stopped");
    }

    fn handle_command(&mut self, cmd: CoordinatorCommand) {
        match cmd {
            CoordinatorCommand::StartSession {
                target,
                duration,
                respond_to,
            } => {
                let result = self.handle_start_session(target, duration);
                let _ = respond_to.send(result);
            }
            CoordinatorCommand::Reconcile {
                trigger,
                expected,
                respond_to,
            } => {
                let result = self.reconcile(trigger, expected.as_ref());
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(result);
                } else if let Err(e) = result {
                    warn!(trigger = %trigger, error = %e, "Reconcile failed");
                }
            }
            CoordinatorCommand::NotificationCallback {
                callback,
                respond_to,
            } => {
                let result = self.handle_notification_callback(callback);
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(result);
                } else if let Err(e) = result {
                    warn!(error = %e, "Notification callback failed");
                }
            }
            CoordinatorCommand::DetectOrphan { respond_to } => {
                let _ = respond_to.send(self.detect_orphan());
            }
            CoordinatorCommand::Foreground { respond_to } => {
                let _ = respond_to.send(self.handle_foreground());
            }
            CoordinatorCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.handle_get_status());
            }
            CoordinatorCommand::GetHistory { limit, respond_to } => {
                let _ = respond_to.send(self.handle_get_history(limit));
            }
            CoordinatorCommand::GetSummary { respond_to } => {
                let _ = respond_to.send(self.handle_get_summary());
            }
            CoordinatorCommand::LogItem { respond_to } => {
                let _ = respond_to.send(self.handle_log_item());
            }
            CoordinatorCommand::ShieldShown {
                target,
                streak_days,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_shield_shown(target, streak_days));
            }
            CoordinatorCommand::RespondInteraction {
                id,
                action,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_respond_interaction(&id, action));
            }
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    fn handle_start_session(
        &mut self,
        target: Option<String>,
        duration: Option<std::time::Duration>,
    ) -> Result<Session, CoordinatorError> {
        let target = match target.filter(|t| !t.trim().is_empty()) {
            Some(target) => target,
            None => self
                .settings
                .targets
                .first()
                .cloned()
                .ok_or(CoordinatorError::NoTarget)?,
        };
        let duration = ChronoDuration::from_std(self.settings.clamp_duration(duration))
            .map_err(|e| CoordinatorError::Domain(shieldpass_core::DomainError::InvalidFieldValue {
                field: "duration".to_string(),
                value: e.to_string(),
                expected: "a representable duration".to_string(),
            }))?;

        // Validated before a previous session is force-closed
        Session::try_new(target.as_str(), self.clock.now(), duration)?;

        match self.store.get_current() {
            Ok(Some(stale)) => {
                info!(session_id = %stale.id, "Force-closing previous session before new pause");
                self.reconcile(Trigger::Manual, None)?;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Store unreadable, shield stays up");
                return Err(persistence(e));
            }
        }
        self.stop_driver();

        let session = Session::try_new(target, self.clock.now(), duration)?;

        // Record first: a pause that cannot be recorded never lowers the shield.
        if let Err(e) = self.store.set_current(&session) {
            warn!(session_id = %session.id, error = %e, "Failed to record session, shield stays up");
            return Err(persistence(e));
        }

        let targets = self.settings.targets_for(&session.target_name);
        if let Err(e) = self.enforcer.remove(&targets) {
            warn!(session_id = %session.id, error = %e, "Failed to lift shield, discarding session");
            if let Err(e) = self.store.clear_current() {
                warn!(session_id = %session.id, error = %e, "Failed to discard unstarted session");
            }
            self.apply_best_effort(&targets);
            return Err(CoordinatorError::Enforcer(e.to_string()));
        }

        self.attach(&session);

        info!(
            session_id = %session.id,
            target = %session.target_name,
            ends_at = %session.scheduled_end_time,
            "Pause started"
        );
        self.publish(CoordinatorEvent::Started {
            session: Box::new(session.clone()),
        });
        Ok(session)
    }

    /// Closes the current session and puts the block back.
    ///
    /// Returns the closed session, or `None` when there was nothing to close
    /// (including a trigger for a session that is no longer current).
    fn reconcile(
        &mut self,
        trigger: Trigger,
        expected: Option<&SessionId>,
    ) -> Result<Option<Session>, CoordinatorError> {
        let mut session = match self.store.get_current() {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(trigger = %trigger, "Reconcile: nothing to close");
                return Ok(None);
            }
            Err(e) => {
                warn!(trigger = %trigger, error = %e, "Store unreadable during reconcile, applying shield anyway");
                let targets = self.settings.targets_for(orphan::UNKNOWN_TARGET);
                self.apply_best_effort(&targets);
                return Err(persistence(e));
            }
        };

        if let Some(expected) = expected {
            if &session.id != expected {
                debug!(
                    trigger = %trigger,
                    expected = %expected,
                    current = %session.id,
                    "Reconcile for an earlier session ignored"
                );
                return Ok(None);
            }
        }

        let targets = self.settings.targets_for(&session.target_name);
        self.enforcer.apply(&targets).map_err(|e| {
            warn!(session_id = %session.id, error = %e, "Failed to apply shield, session kept for retry");
            CoordinatorError::Enforcer(e.to_string())
        })?;

        let now = self.clock.now();
        if session.close(now, trigger.restoration_method()) {
            if let Err(e) = self.store.set_current(&session) {
                warn!(session_id = %session.id, error = %e, "Failed to persist close time");
            }
        }

        self.detach(&session.id);

        if let Err(e) = self.store.append_to_history(&session) {
            warn!(session_id = %session.id, error = %e, "Failed to append history, shield is up");
            return Err(persistence(e));
        }
        if let Err(e) = self.store.clear_current() {
            warn!(session_id = %session.id, error = %e, "Failed to clear current session, shield is up");
            return Err(persistence(e));
        }

        self.record(&AnalyticsRecord::SessionClosed {
            session: session.clone(),
            trigger,
            recorded_at: now,
        });

        info!(
            session_id = %session.id,
            trigger = %trigger,
            method = %session
                .restoration_method()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".to_string()),
            "Session closed, shield restored"
        );
        self.publish(CoordinatorEvent::Closed {
            session: Box::new(session.clone()),
            trigger,
        });
        Ok(Some(session))
    }

    fn handle_notification_callback(
        &mut self,
        callback: NotificationCallback,
    ) -> Result<Option<Session>, CoordinatorError> {
        match callback {
            NotificationCallback::Delivered { id } => {
                self.mark_delivered(&SessionId::new(id));
                Ok(None)
            }
            NotificationCallback::Action { id, action } => {
                if self.settings.is_restore_action(&action) {
                    self.reconcile(Trigger::NotificationTapped, Some(&SessionId::new(id)))
                } else {
                    debug!(notification_id = %id, action = %action, "Notification action ignored");
                    Ok(None)
                }
            }
            NotificationCallback::ForegroundPresent { id } => {
                self.reconcile(Trigger::NotificationTapped, Some(&SessionId::new(id)))
            }
        }
    }

    fn mark_delivered(&mut self, id: &SessionId) {
        let mut session = match self.store.get_current() {
            Ok(Some(session)) if &session.id == id && !session.is_closed() => session,
            Ok(_) => {
                debug!(session_id = %id, "Delivery for a session that is not current");
                return;
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Cannot record notification delivery");
                return;
            }
        };
        session.mark_notification_delivered();
        if let Err(e) = self.store.set_current(&session) {
            warn!(session_id = %id, error = %e, "Failed to persist notification delivery");
        }
    }

    /// Puts the block back if it is down with no session recorded.
    fn detect_orphan(&mut self) -> Result<Option<Session>, CoordinatorError> {
        match self.store.get_current() {
            Ok(Some(_)) => return Ok(None),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Store unreadable during orphan check, applying shield anyway");
                let targets = self.settings.targets_for(orphan::UNKNOWN_TARGET);
                self.apply_best_effort(&targets);
                return Err(persistence(e));
            }
        }

        let blocked = match self.enforcer.currently_blocked() {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(error = %e, "Shield state unknown, re-applying");
                let targets = self.settings.targets_for(orphan::UNKNOWN_TARGET);
                self.apply_best_effort(&targets);
                return Ok(None);
            }
        };
        if blocked {
            return Ok(None);
        }

        let now = self.clock.now();
        let history = self.store.all_history().unwrap_or_else(|e| {
            warn!(error = %e, "History unreadable, reconstructing orphan without it");
            Vec::new()
        });
        let default_duration = ChronoDuration::from_std(self.settings.default_duration)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));
        let session = orphan::reconstruct(
            &history,
            self.settings.targets.first().map(String::as_str),
            default_duration,
            now,
        );

        warn!(
            session_id = %session.id,
            target = %session.target_name,
            "Shield found down with no session recorded, re-applying"
        );

        let targets = self.settings.targets_for(&session.target_name);
        self.enforcer
            .apply(&targets)
            .map_err(|e| CoordinatorError::Enforcer(e.to_string()))?;
        self.detach(&session.id);

        if let Err(e) = self.store.append_to_history(&session) {
            warn!(session_id = %session.id, error = %e, "Failed to record reconstructed session");
        }
        self.record(&AnalyticsRecord::OrphanRepaired {
            session: session.clone(),
            recorded_at: now,
        });
        self.publish(CoordinatorEvent::OrphanRepaired {
            session: Box::new(session.clone()),
        });
        Ok(Some(session))
    }

    fn handle_foreground(&mut self) -> Result<ForegroundReport, CoordinatorError> {
        let mut report = ForegroundReport {
            orphan: self.detect_orphan()?,
            ..ForegroundReport::default()
        };

        let Some(session) = self.store.get_current().map_err(persistence)? else {
            return Ok(report);
        };

        if session.phase(self.clock.now()) == SessionPhase::Active {
            debug!(session_id = %session.id, "Foreground: pause still running, resyncing countdown");
            self.attach(&session);
            report.resumed = Some(session);
        } else {
            report.closed = self.reconcile(Trigger::ForegroundFailsafe, Some(&session.id))?;
        }
        Ok(report)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn handle_get_status(&self) -> ShieldStatus {
        let now = self.clock.now();
        let current = self.store.get_current().unwrap_or_else(|e| {
            warn!(error = %e, "Store unreadable for status");
            None
        });
        let blocked = self.enforcer.currently_blocked().unwrap_or_else(|e| {
            debug!(error = %e, "Shield state unknown for status");
            current.is_none()
        });

        ShieldStatus {
            blocked,
            session: current.map(|s| SessionView::from_session(&s, now)),
        }
    }

    fn handle_get_history(&self, limit: Option<usize>) -> Result<Vec<Session>, CoordinatorError> {
        let mut history = self.store.all_history().map_err(persistence)?;
        if let Some(limit) = limit {
            let skip = history.len().saturating_sub(limit);
            history.drain(..skip);
        }
        Ok(history)
    }

    fn handle_get_summary(&self) -> Result<(HistorySummary, InteractionSummary), CoordinatorError> {
        let history = self.store.all_history().map_err(persistence)?;
        let records = self
            .analytics
            .records()
            .map_err(|e| CoordinatorError::Analytics(e.to_string()))?;

        let summary = HistorySummary::from_history(&history).with_items_after(count_items_after(&records));
        let interactions = InteractionSummary::from_events(&fold_interactions(&records));
        Ok((summary, interactions))
    }

    // ========================================================================
    // Items and interactions
    // ========================================================================

    fn handle_log_item(&mut self) -> Result<LogItemOutcome, CoordinatorError> {
        let now = self.clock.now();

        if let Some(mut session) = self.store.get_current().map_err(persistence)? {
            if !session.is_closed() {
                session.record_item_logged();
                self.store.set_current(&session).map_err(persistence)?;
                debug!(session_id = %session.id, count = session.items_logged_during, "Item logged during pause");
                return Ok(LogItemOutcome::During(session.id));
            }
        }

        let history = self.store.all_history().map_err(persistence)?;
        let window = ChronoDuration::from_std(self.settings.follow_up_window)
            .unwrap_or(ChronoDuration::MAX);

        let recent = history.last().filter(|last| {
            last.actual_end_time
                .map(|end| now >= end && now - end <= window)
                .unwrap_or(false)
        });
        let Some(last) = recent else {
            return Ok(LogItemOutcome::Untracked);
        };

        self.analytics
            .record(&AnalyticsRecord::ItemLoggedAfter {
                session_id: last.id.clone(),
                recorded_at: now,
            })
            .map_err(|e| CoordinatorError::Analytics(e.to_string()))?;
        debug!(session_id = %last.id, "Item logged after pause");
        Ok(LogItemOutcome::After(last.id.clone()))
    }

    fn handle_shield_shown(
        &mut self,
        target: String,
        streak_days: u32,
    ) -> Result<InteractionId, CoordinatorError> {
        let event = InteractionEvent::shown(target, streak_days, self.clock.now());
        let id = event.id.clone();
        self.analytics
            .record(&AnalyticsRecord::InteractionShown { event })
            .map_err(|e| CoordinatorError::Analytics(e.to_string()))?;
        Ok(id)
    }

    fn handle_respond_interaction(
        &mut self,
        id: &InteractionId,
        action: UserAction,
    ) -> Result<InteractionEvent, CoordinatorError> {
        let records = self
            .analytics
            .records()
            .map_err(|e| CoordinatorError::Analytics(e.to_string()))?;
        let mut event = fold_interactions(&records)
            .into_iter()
            .find(|e| &e.id == id)
            .ok_or_else(|| CoordinatorError::InteractionNotFound(id.clone()))?;

        let now = self.clock.now();
        event.complete(action, now)?;

        self.analytics
            .record(&AnalyticsRecord::InteractionCompleted {
                id: id.clone(),
                action,
                responded_at: now,
            })
            .map_err(|e| CoordinatorError::Analytics(e.to_string()))?;
        Ok(event)
    }

    // ========================================================================
    // Collaborator plumbing
    // ========================================================================

    /// Starts the countdown display, arms the notification, runs the driver.
    /// Safe to repeat for the same session.
    fn attach(&mut self, session: &Session) {
        if let Some(surface) = &self.surface {
            match surface.start(&session.target_name, session.start_time, session.scheduled_end_time) {
                Ok(()) => {}
                Err(SurfaceError::Unsupported) => debug!("Countdown surface unsupported, skipping"),
                Err(e) => warn!(session_id = %session.id, error = %e, "Countdown surface failed to start"),
            }
        }

        if let Err(e) = self.notifier.schedule(
            session.id.as_str(),
            session.scheduled_end_time,
            NotificationPayload::pause_over(&session.target_name),
        ) {
            warn!(session_id = %session.id, error = %e, "Failed to schedule notification");
        }

        let already_running = self
            .driver
            .as_ref()
            .map(|d| d.session_id() == &session.id && d.is_running())
            .unwrap_or(false);
        if !already_running {
            self.stop_driver();
            self.driver = Some(CountdownDriver::spawn(
                session,
                Arc::clone(&self.clock),
                self.surface.clone(),
                self.self_sender.clone(),
                self.settings.tick_interval,
            ));
        }
    }

    /// Stops the countdown, clears the display, cancels the notification.
    fn detach(&mut self, id: &SessionId) {
        self.stop_driver();
        if let Some(surface) = &self.surface {
            if let Err(e) = surface.end() {
                debug!(error = %e, "Countdown surface failed to end");
            }
        }
        self.notifier.cancel(id.as_str());
    }

    fn stop_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.stop();
        }
    }

    fn apply_best_effort(&self, targets: &[String]) {
        if let Err(e) = self.enforcer.apply(targets) {
            warn!(error = %e, "Failed to apply shield");
        }
    }

    fn record(&self, record: &AnalyticsRecord) {
        if let Err(e) = self.analytics.record(record) {
            warn!(error = %e, "Failed to record analytics");
        }
    }

    fn publish(&self, event: CoordinatorEvent) {
        if self.event_publisher.send(event).is_err() {
            debug!("No subscribers for coordinator event");
        }
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    #[cfg(test)]
    pub fn driver_session(&self) -> Option<&SessionId> {
        self.driver
            .as_ref()
            .filter(|d| d.is_running())
            .map(CountdownDriver::session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        EnforcerCall, MemoryRecorder, MemoryStore, RecordingEnforcer, RecordingNotifier,
        RecordingSurface, SurfaceCall,
    };
    use chrono::Utc;
    use shieldpass_core::{ManualClock, RestorationMethod};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct Fixture {
        actor: CoordinatorActor,
        _sender: mpsc::Sender<CoordinatorCommand>,
        events: broadcast::Receiver<CoordinatorEvent>,
        store: MemoryStore,
        enforcer: RecordingEnforcer,
        surface: RecordingSurface,
        notifier: RecordingNotifier,
        analytics: MemoryRecorder,
        clock: Arc<ManualClock>,
    }

    fn create_actor() -> Fixture {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);

        let store = MemoryStore::new();
        let enforcer = RecordingEnforcer::new();
        let surface = RecordingSurface::new();
        let notifier = RecordingNotifier::new();
        let analytics = MemoryRecorder::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let collaborators = Collaborators {
            store: Box::new(store.clone()),
            enforcer: Box::new(enforcer.clone()),
            surface: Some(Arc::new(surface.clone())),
            notifier: Box::new(notifier.clone()),
            analytics: Box::new(analytics.clone()),
            clock: clock.clone(),
        };
        let settings = CoordinatorSettings {
            targets: vec!["ShopApp".to_string()],
            tick_interval: Duration::from_secs(3600),
            ..CoordinatorSettings::default()
        };

        let actor = CoordinatorActor::new(cmd_rx, cmd_tx.downgrade(), event_tx, collaborators, settings);
        Fixture {
            actor,
            _sender: cmd_tx,
            events: event_rx,
            store,
            enforcer,
            surface,
            notifier,
            analytics,
            clock,
        }
    }

    fn start(f: &mut Fixture, minutes: u64) -> Session {
        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::StartSession {
            target: None,
            duration: Some(Duration::from_secs(minutes * 60)),
            respond_to: tx,
        });
        rx.try_recv().unwrap().unwrap()
    }

    fn reconcile(f: &mut Fixture, trigger: Trigger) -> Option<Session> {
        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::Reconcile {
            trigger,
            expected: None,
            respond_to: Some(tx),
        });
        rx.try_recv().unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_start_session_lifts_shield_and_arms_everything() {
        let mut f = create_actor();
        let session = start(&mut f, 10);

        assert!(!f.enforcer.is_blocked());
        assert_eq!(f.store.get_current().unwrap(), Some(session.clone()));
        assert_eq!(f.notifier.pending(session.id.as_str()), Some(session.scheduled_end_time));
        assert!(matches!(f.surface.calls().first(), Some(SurfaceCall::Start { .. })));
        assert_eq!(f.actor.driver_session(), Some(&session.id));
        assert!(matches!(
            f.events.try_recv().unwrap(),
            CoordinatorEvent::Started { .. }
        ));
    }

    #[tokio::test]
    async fn test_start_session_clamps_duration() {
        let mut f = create_actor();
        let session = start(&mut f, 24 * 60);
        assert_eq!(session.planned_duration(), ChronoDuration::minutes(60));
    }

    #[tokio::test]
    async fn test_start_session_without_target_fails() {
        let mut f = create_actor();
        f.actor.settings.targets.clear();

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::StartSession {
            target: None,
            duration: None,
            respond_to: tx,
        });
        assert!(matches!(rx.try_recv().unwrap(), Err(CoordinatorError::NoTarget)));
        assert_eq!(f.enforcer.remove_count(), 0);
    }

    #[tokio::test]
    async fn test_start_session_rejects_end_past_calendar() {
        let mut f = create_actor();
        let huge = Duration::from_secs(9_000_000_000_000);
        f.actor.settings.max_duration = huge;

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::StartSession {
            target: None,
            duration: Some(huge),
            respond_to: tx,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CoordinatorError::Domain(shieldpass_core::DomainError::InvalidFieldValue { .. }))
        ));
        assert_eq!(f.enforcer.remove_count(), 0);
        assert!(f.store.get_current().unwrap().is_none());

        // The actor keeps serving
        let session = start(&mut f, 5);
        assert!(!f.enforcer.is_blocked());
        assert_eq!(reconcile(&mut f, Trigger::Manual).unwrap().id, session.id);
    }

    #[tokio::test]
    async fn test_start_session_fails_closed_when_store_unavailable() {
        let mut f = create_actor();
        f.store.set_unavailable(true);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::StartSession {
            target: None,
            duration: None,
            respond_to: tx,
        });

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CoordinatorError::PersistenceUnavailable(_))
        ));
        assert_eq!(f.enforcer.remove_count(), 0);
        assert!(f.enforcer.is_blocked());
        assert_eq!(f.notifier.scheduled_total(), 0);
    }

    #[tokio::test]
    async fn test_start_session_discards_record_when_lift_fails() {
        let mut f = create_actor();
        f.enforcer.set_failing(true);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::StartSession {
            target: None,
            duration: None,
            respond_to: tx,
        });

        assert!(matches!(rx.try_recv().unwrap(), Err(CoordinatorError::Enforcer(_))));
        assert!(f.store.get_current().unwrap().is_none());
        assert!(f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_reconcile_closes_once() {
        let mut f = create_actor();
        let session = start(&mut f, 10);
        f.clock.advance(ChronoDuration::minutes(3));

        let closed = reconcile(&mut f, Trigger::Manual).unwrap();
        assert_eq!(closed.id, session.id);
        assert!(closed.restored_manually);
        assert!(closed.ended_early());
        assert!(f.enforcer.is_blocked());
        assert!(f.store.get_current().unwrap().is_none());
        assert_eq!(f.store.all_history().unwrap().len(), 1);
        assert_eq!(f.notifier.pending_count(), 0);
        assert!(f.surface.end_count() >= 1);
        assert_eq!(f.actor.driver_session(), None);

        // Every later trigger is a no-op
        for trigger in [Trigger::TimerExpired, Trigger::NotificationTapped, Trigger::MonitorCallback] {
            assert!(reconcile(&mut f, trigger).is_none());
        }
        assert_eq!(f.store.all_history().unwrap().len(), 1);
        assert_eq!(f.analytics.records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_without_session_is_noop() {
        let mut f = create_actor();
        assert!(reconcile(&mut f, Trigger::TimerExpired).is_none());
        assert!(f.enforcer.calls().is_empty());
        assert!(f.analytics.records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_trigger_does_not_close_new_session() {
        let mut f = create_actor();
        let first = start(&mut f, 10);
        let second = start(&mut f, 10);
        assert_ne!(first.id, second.id);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::Reconcile {
            trigger: Trigger::TimerExpired,
            expected: Some(first.id.clone()),
            respond_to: Some(tx),
        });
        assert!(rx.try_recv().unwrap().unwrap().is_none());
        assert_eq!(f.store.get_current().unwrap().map(|s| s.id), Some(second.id));
    }

    #[tokio::test]
    async fn test_start_force_closes_previous_as_manual() {
        let mut f = create_actor();
        let first = start(&mut f, 10);
        let _second = start(&mut f, 10);

        let history = f.store.all_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[0].restoration_method(), Some(RestorationMethod::Manual));
        assert!(f.notifier.cancelled().contains(&first.id.to_string()));
    }

    #[tokio::test]
    async fn test_reconcile_persistence_failure_still_applies_shield() {
        let mut f = create_actor();
        start(&mut f, 10);
        f.store.set_unavailable(true);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::Reconcile {
            trigger: Trigger::TimerExpired,
            expected: None,
            respond_to: Some(tx),
        });

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CoordinatorError::PersistenceUnavailable(_))
        ));
        assert!(f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_notification_delivery_only_flags() {
        let mut f = create_actor();
        let session = start(&mut f, 10);

        f.actor.handle_command(CoordinatorCommand::NotificationCallback {
            callback: NotificationCallback::Delivered {
                id: session.id.to_string(),
            },
            respond_to: None,
        });

        let current = f.store.get_current().unwrap().unwrap();
        assert!(current.notification_delivered);
        assert!(current.actual_end_time.is_none());
        assert!(!f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_notification_restore_action_closes() {
        let mut f = create_actor();
        let session = start(&mut f, 10);
        f.clock.advance(ChronoDuration::minutes(10));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::NotificationCallback {
            callback: NotificationCallback::Action {
                id: session.id.to_string(),
                action: "default".to_string(),
            },
            respond_to: Some(tx),
        });

        let closed = rx.try_recv().unwrap().unwrap().unwrap();
        assert!(closed.notification_tapped);
        assert!(f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_notification_other_action_ignored() {
        let mut f = create_actor();
        let session = start(&mut f, 10);

        f.actor.handle_command(CoordinatorCommand::NotificationCallback {
            callback: NotificationCallback::Action {
                id: session.id.to_string(),
                action: "snooze".to_string(),
            },
            respond_to: None,
        });
        assert!(f.store.get_current().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_orphan_repair() {
        let mut f = create_actor();
        f.enforcer.set_blocked(false);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::DetectOrphan { respond_to: tx });

        let orphan = rx.try_recv().unwrap().unwrap().unwrap();
        assert!(orphan.id.is_synthetic());
        assert_eq!(orphan.target_name, "ShopApp");
        assert!(f.enforcer.is_blocked());
        assert_eq!(f.store.all_history().unwrap().len(), 1);
        assert!(matches!(
            f.events.try_recv().unwrap(),
            CoordinatorEvent::OrphanRepaired { .. }
        ));

        // Consistent now: a second pass finds nothing
        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::DetectOrphan { respond_to: tx });
        assert!(rx.try_recv().unwrap().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphan_check_ignores_active_session() {
        let mut f = create_actor();
        start(&mut f, 10);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::DetectOrphan { respond_to: tx });
        assert!(rx.try_recv().unwrap().unwrap().is_none());
        assert!(!f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_foreground_failsafe_closes_expired() {
        let mut f = create_actor();
        let session = start(&mut f, 10);
        f.actor.stop_driver();
        f.clock.advance(ChronoDuration::minutes(12));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::Foreground { respond_to: tx });
        let report = rx.try_recv().unwrap().unwrap();

        let closed = report.closed.unwrap();
        assert_eq!(closed.id, session.id);
        assert_eq!(closed.restoration_method(), None);
        assert!(report.orphan.is_none());
        assert!(f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_foreground_resyncs_active_session() {
        let mut f = create_actor();
        let session = start(&mut f, 10);
        f.actor.stop_driver();
        assert_eq!(f.actor.driver_session(), None);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::Foreground { respond_to: tx });
        let report = rx.try_recv().unwrap().unwrap();

        assert_eq!(report.resumed.map(|s| s.id), Some(session.id.clone()));
        assert_eq!(f.actor.driver_session(), Some(&session.id));
        assert!(!f.enforcer.is_blocked());
    }

    #[tokio::test]
    async fn test_status_reports_session() {
        let mut f = create_actor();
        let session = start(&mut f, 10);
        f.clock.advance(ChronoDuration::seconds(55));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::GetStatus { respond_to: tx });
        let status = rx.try_recv().unwrap();

        assert!(!status.blocked);
        let view = status.session.unwrap();
        assert_eq!(view.id, session.id);
        assert_eq!(view.remaining_secs, 545);
        assert_eq!(view.remaining_display, "9:05");
    }

    #[tokio::test]
    async fn test_log_item_during_and_after() {
        let mut f = create_actor();
        let session = start(&mut f, 10);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::LogItem { respond_to: tx });
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            LogItemOutcome::During(session.id.clone())
        );

        reconcile(&mut f, Trigger::Manual);
        f.clock.advance(ChronoDuration::minutes(5));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::LogItem { respond_to: tx });
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            LogItemOutcome::After(session.id.clone())
        );

        f.clock.advance(ChronoDuration::hours(2));
        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::LogItem { respond_to: tx });
        assert_eq!(rx.try_recv().unwrap().unwrap(), LogItemOutcome::Untracked);

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::GetSummary { respond_to: tx });
        let (summary, _) = rx.try_recv().unwrap().unwrap();
        assert_eq!(summary.items_logged_during, 1);
        assert_eq!(summary.items_logged_after, 1);
        assert_eq!(summary.total_sessions, 1);
    }

    #[tokio::test]
    async fn test_interaction_completes_once() {
        let mut f = create_actor();

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::ShieldShown {
            target: "ShopApp".to_string(),
            streak_days: 4,
            respond_to: tx,
        });
        let id = rx.try_recv().unwrap().unwrap();

        f.clock.advance(ChronoDuration::seconds(3));
        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::RespondInteraction {
            id: id.clone(),
            action: UserAction::KeptBlocked,
            respond_to: tx,
        });
        let event = rx.try_recv().unwrap().unwrap();
        assert_eq!(event.response_duration_ms(), Some(3000));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::RespondInteraction {
            id: id.clone(),
            action: UserAction::Dismissed,
            respond_to: tx,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CoordinatorError::Domain(_))
        ));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::RespondInteraction {
            id: InteractionId::new("missing"),
            action: UserAction::Dismissed,
            respond_to: tx,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CoordinatorError::InteractionNotFound(_))
        ));

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::GetSummary { respond_to: tx });
        let (_, interactions) = rx.try_recv().unwrap().unwrap();
        assert_eq!(interactions.shown, 1);
        assert_eq!(interactions.kept_blocked, 1);
    }

    #[tokio::test]
    async fn test_history_limit() {
        let mut f = create_actor();
        for _ in 0..3 {
            start(&mut f, 1);
            reconcile(&mut f, Trigger::Manual);
        }

        let (tx, mut rx) = oneshot::channel();
        f.actor.handle_command(CoordinatorCommand::GetHistory {
            limit: Some(2),
            respond_to: tx,
        });
        assert_eq!(rx.try_recv().unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enforcer_calls_use_configured_targets() {
        let mut f = create_actor();
        start(&mut f, 1);
        reconcile(&mut f, Trigger::Manual);

        assert_eq!(
            f.enforcer.calls(),
            vec![
                EnforcerCall::Remove(vec!["ShopApp".to_string()]),
                EnforcerCall::Apply(vec!["ShopApp".to_string()]),
            ]
        );
    }
}
