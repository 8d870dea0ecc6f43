//! Notifier: schedules the "pause is over" notification.
//!
//! The notifier never restores anything itself. Its callbacks flow back into
//! the coordinator, which decides what they mean.

use std::collections::HashMap;
use std::process::Command;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use shieldpass_core::Clock;
use shieldpass_protocol::NotificationCallback;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("no async runtime available to schedule notification")]
    NoRuntime,

    #[error("notifier state poisoned")]
    Poisoned,
}

/// What the user sees when the notification fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// Action identifiers offered alongside the notification
    pub actions: Vec<String>,
}

impl NotificationPayload {
    /// Standard payload for the end of a pause on `target`.
    pub fn pause_over(target: &str) -> Self {
        Self {
            title: "Shield is back".to_string(),
            body: format!("Your pause on {target} is over."),
            actions: vec!["restore".to_string()],
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Schedules `payload` for `fire_at` under `id`, replacing any pending
    /// notification with the same id.
    fn schedule(
        &self,
        id: &str,
        fire_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), NotifierError>;

    /// Cancels the pending notification `id`. Unknown ids are ignored.
    fn cancel(&self, id: &str);
}

/// Notifier backed by tokio timers.
///
/// When a notification fires it is presented (logged, and handed to the
/// display command if configured), then `Delivered` and
/// `ForegroundPresent` callbacks are sent on the callback channel: the
/// daemon is by definition running when it fires.
pub struct ScheduledNotifier {
    clock: Arc<dyn Clock>,
    callbacks: mpsc::UnboundedSender<NotificationCallback>,
    display_command: Option<String>,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ScheduledNotifier {
    pub fn new(
        clock: Arc<dyn Clock>,
        callbacks: mpsc::UnboundedSender<NotificationCallback>,
        display_command: Option<String>,
    ) -> Self {
        Self {
            clock,
            callbacks,
            display_command,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of notifications still waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .map(|mut pending| {
                pending.retain(|_, task| !task.is_finished());
                pending.len()
            })
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ScheduledNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledNotifier")
            .field("display_command", &self.display_command)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Notifier for ScheduledNotifier {
    fn schedule(
        &self,
        id: &str,
        fire_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), NotifierError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| NotifierError::NoRuntime)?;
        let delay = (fire_at - self.clock.now()).to_std().unwrap_or_default();

        let id_owned = id.to_string();
        let callbacks = self.callbacks.clone();
        let display_command = self.display_command.clone();

        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            present(&payload, display_command.as_deref());
            let _ = callbacks.send(NotificationCallback::Delivered {
                id: id_owned.clone(),
            });
            let _ = callbacks.send(NotificationCallback::ForegroundPresent { id: id_owned });
        });

        let mut pending = self.pending.lock().map_err(|_| NotifierError::Poisoned)?;
        if let Some(previous) = pending.insert(id.to_string(), task) {
            previous.abort();
        }
        debug!(notification_id = %id, fire_at = %fire_at, "Notification scheduled");
        Ok(())
    }

    fn cancel(&self, id: &str) {
        match self.pending.lock() {
            Ok(mut pending) => {
                if let Some(task) = pending.remove(id) {
                    task.abort();
                    debug!(notification_id = %id, "Notification cancelled");
                }
            }
            Err(_) => warn!(notification_id = %id, "Notifier state poisoned, cancel skipped"),
        }
    }
}

fn present(payload: &NotificationPayload, display_command: Option<&str>) {
    info!(title = %payload.title, body = %payload.body, "Notification fired");

    let Some(command) = display_command else {
        return;
    };
    if let Err(e) = Command::new(command)
        .arg(&payload.title)
        .arg(&payload.body)
        .spawn()
    {
        warn!(command, error = %e, "Failed to run notification display command");
    }
}
