//! Session coordinator using the actor pattern.
//!
//! The coordinator is the single writer of session state. Every path that
//! can end a pause sends it a command; it serializes them, so concurrent
//! wake-ups collapse into exactly one restoration.
//!
//! # Architecture
//!
//! ```text
//!  CLI / shims ──────┐
//!  countdown driver ─┼─▶ CoordinatorActor ──▶ store, enforcer, surface,
//!  notifier ─────────┘     (mpsc queue)         notifier, analytics
//!                               │
//!                               └──▶ CoordinatorEvent (broadcast)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel closure ends background tasks quietly

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

mod actor;
mod commands;
mod handle;

pub use actor::{Collaborators, CoordinatorActor};
pub use commands::{
    CoordinatorCommand, CoordinatorError, CoordinatorEvent, ForegroundReport, LogItemOutcome,
};
pub use handle::{CoordinatorHandle, WeakCoordinatorHandle};

use crate::config::CoordinatorSettings;
use shieldpass_protocol::NotificationCallback;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawns the coordinator actor and returns a handle to it.
///
/// The actor stops when every handle (and every clone) is dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use shieldpass_core::SystemClock;
/// use shieldpassd::config::CoordinatorSettings;
/// use shieldpassd::coordinator::{spawn_coordinator, Collaborators};
/// use shieldpassd::testing::{MemoryRecorder, MemoryStore, RecordingEnforcer, RecordingNotifier};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_coordinator(
///         Collaborators {
///             store: Box::new(MemoryStore::new()),
///             enforcer: Box::new(RecordingEnforcer::new()),
///             surface: None,
///             notifier: Box::new(RecordingNotifier::new()),
///             analytics: Box::new(MemoryRecorder::new()),
///             clock: Arc::new(SystemClock),
///         },
///         CoordinatorSettings::default(),
///     );
///     let status = handle.status().await;
/// }
/// ```
pub fn spawn_coordinator(
    collaborators: Collaborators,
    settings: CoordinatorSettings,
) -> CoordinatorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = CoordinatorActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        event_tx.clone(),
        collaborators,
        settings,
    );
    tokio::spawn(actor.run());

    CoordinatorHandle::new(cmd_tx, event_tx)
}

/// Forwards notifier callbacks into the coordinator until either side closes.
///
/// The callback sender usually lives inside the actor (in the notifier), so
/// the router only holds a weak handle.
pub fn spawn_notification_router(
    handle: &CoordinatorHandle,
    mut callbacks: mpsc::UnboundedReceiver<NotificationCallback>,
) {
    let weak = handle.downgrade();
    tokio::spawn(async move {
        while let Some(callback) = callbacks.recv().await {
            let Some(handle) = weak.upgrade() else {
                debug!("Notification router stopping: coordinator handles dropped");
                break;
            };
            let id = callback.id().to_string();
            match handle.notification_callback(callback).await {
                Ok(Some(session)) => debug!(session_id = %session.id, "Notification closed session"),
                Ok(None) => {}
                Err(CoordinatorError::ChannelClosed) => {
                    debug!("Notification router stopping: coordinator channel closed");
                    break;
                }
                Err(e) => warn!(notification_id = %id, error = %e, "Notification callback failed"),
            }
        }
    });
}
