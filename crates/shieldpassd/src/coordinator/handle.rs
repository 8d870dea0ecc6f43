//! Client interface for the coordinator actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()`
//! - Channel errors map to `CoordinatorError::ChannelClosed`

use std::time::Duration;

use shieldpass_core::{
    HistorySummary, InteractionEvent, InteractionId, InteractionSummary, Session, SessionId,
    Trigger, UserAction,
};
use shieldpass_protocol::{NotificationCallback, ShieldStatus};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::commands::{
    CoordinatorCommand, CoordinatorError, CoordinatorEvent, ForegroundReport, LogItemOutcome,
};

/// Cheap-to-clone handle to the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
    event_sender: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    pub fn new(
        sender: mpsc::Sender<CoordinatorCommand>,
        event_sender: broadcast::Sender<CoordinatorEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Sends a command built around a fresh oneshot and awaits the reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorCommand,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Lifts the shield for `duration` (clamped to the configured maximum).
    ///
    /// # Errors
    ///
    /// - `PersistenceUnavailable` if the session could not be recorded; the
    ///   shield was not touched
    /// - `Enforcer` if the shield could not be lifted
    /// - `NoTarget` if no target was given or configured
    pub async fn start_session(
        &self,
        target: Option<String>,
        duration: Option<Duration>,
    ) -> Result<Session, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::StartSession {
            target,
            duration,
            respond_to,
        })
        .await?
    }

    /// Closes the current session, if any, and re-applies the shield.
    ///
    /// Safe to call from every wake-up path, any number of times.
    pub async fn reconcile(&self, trigger: Trigger) -> Result<Option<Session>, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::Reconcile {
            trigger,
            expected: None,
            respond_to: Some(respond_to),
        })
        .await?
    }

    /// Like `reconcile`, but only acts if `session_id` is still current.
    pub async fn reconcile_session(
        &self,
        session_id: SessionId,
        trigger: Trigger,
    ) -> Result<Option<Session>, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::Reconcile {
            trigger,
            expected: Some(session_id),
            respond_to: Some(respond_to),
        })
        .await?
    }

    /// The user chose to put the shield back before the pause ended.
    pub async fn restore_early(&self) -> Result<Option<Session>, CoordinatorError> {
        self.reconcile(Trigger::Manual).await
    }

    pub async fn notification_callback(
        &self,
        callback: NotificationCallback,
    ) -> Result<Option<Session>, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::NotificationCallback {
            callback,
            respond_to: Some(respond_to),
        })
        .await?
    }

    pub async fn detect_orphan(&self) -> Result<Option<Session>, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::DetectOrphan { respond_to })
            .await?
    }

    /// Runs the foreground pass: orphan repair, expiry failsafe, countdown resync.
    pub async fn on_foreground(&self) -> Result<ForegroundReport, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::Foreground { respond_to })
            .await?
    }

    pub async fn status(&self) -> Result<ShieldStatus, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::GetStatus { respond_to })
            .await
    }

    pub async fn history(&self, limit: Option<usize>) -> Result<Vec<Session>, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::GetHistory { limit, respond_to })
            .await?
    }

    pub async fn summary(
        &self,
    ) -> Result<(HistorySummary, InteractionSummary), CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::GetSummary { respond_to })
            .await?
    }

    pub async fn log_item(&self) -> Result<LogItemOutcome, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::LogItem { respond_to })
            .await?
    }

    pub async fn shield_shown(
        &self,
        target: String,
        streak_days: u32,
    ) -> Result<InteractionId, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::ShieldShown {
            target,
            streak_days,
            respond_to,
        })
        .await?
    }

    /// # Errors
    ///
    /// `Domain(InteractionAlreadyCompleted)` on any response after the first.
    pub async fn respond_interaction(
        &self,
        id: InteractionId,
        action: UserAction,
    ) -> Result<InteractionEvent, CoordinatorError> {
        self.request(|respond_to| CoordinatorCommand::RespondInteraction {
            id,
            action,
            respond_to,
        })
        .await?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_sender.subscribe()
    }

    /// Returns false once the actor has stopped.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// A handle that does not keep the actor alive.
    pub fn downgrade(&self) -> WeakCoordinatorHandle {
        WeakCoordinatorHandle {
            sender: self.sender.downgrade(),
            event_sender: self.event_sender.clone(),
        }
    }
}

/// Non-owning counterpart of [`CoordinatorHandle`] for long-lived tasks the
/// actor itself feeds.
#[derive(Clone)]
pub struct WeakCoordinatorHandle {
    sender: mpsc::WeakSender<CoordinatorCommand>,
    event_sender: broadcast::Sender<CoordinatorEvent>,
}

impl WeakCoordinatorHandle {
    /// `None` once every strong handle is gone.
    pub fn upgrade(&self) -> Option<CoordinatorHandle> {
        let sender = self.sender.upgrade()?;
        Some(CoordinatorHandle::new(sender, self.event_sender.clone()))
    }
}
