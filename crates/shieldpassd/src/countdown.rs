//! Live countdown driver.
//!
//! A 1 Hz ticker bound to one session. Each tick recomputes the remaining
//! time from the session's end time and the clock, so the driver keeps no
//! state worth preserving and can be dropped and restarted at will. When the
//! remaining time reaches zero it asks the coordinator to reconcile (once)
//! and stops.
//!
//! The driver holds only a weak sender: a running countdown never keeps the
//! coordinator alive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use shieldpass_core::{Clock, Session, SessionId, Trigger};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collaborators::CountdownSurface;
use crate::coordinator::CoordinatorCommand;

/// Handle to a running countdown task. Dropping it stops the task.
#[derive(Debug)]
pub struct CountdownDriver {
    session_id: SessionId,
    cancel: CancellationToken,
}

impl CountdownDriver {
    /// Spawns a driver for `session`.
    pub fn spawn(
        session: &Session,
        clock: Arc<dyn Clock>,
        surface: Option<Arc<dyn CountdownSurface>>,
        coordinator: mpsc::WeakSender<CoordinatorCommand>,
        tick: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = DriverTask {
            session_id: session.id.clone(),
            end: session.scheduled_end_time,
            clock,
            surface,
            coordinator,
            tick,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        debug!(session_id = %session.id, "Countdown driver started");
        Self {
            session_id: session.id.clone(),
            cancel,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// False once stopped or after it fired.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CountdownDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct DriverTask {
    session_id: SessionId,
    end: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    surface: Option<Arc<dyn CountdownSurface>>,
    coordinator: mpsc::WeakSender<CoordinatorCommand>,
    tick: Duration,
    cancel: CancellationToken,
}

impl DriverTask {
    async fn run(self) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session_id = %self.session_id, "Countdown driver stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let now = self.clock.now();
            if now >= self.end {
                self.fire().await;
                self.cancel.cancel();
                return;
            }

            if let Some(surface) = &self.surface {
                let remaining_ms = (self.end - now).num_milliseconds().max(0) as u64;
                if let Err(e) = surface.update(self.end, remaining_ms.div_ceil(1000)) {
                    debug!(session_id = %self.session_id, error = %e, "Countdown surface update failed");
                }
            }
        }
    }

    async fn fire(&self) {
        let Some(sender) = self.coordinator.upgrade() else {
            debug!(session_id = %self.session_id, "Countdown expired after coordinator shut down");
            return;
        };

        debug!(session_id = %self.session_id, "Countdown reached zero");
        let cmd = CoordinatorCommand::Reconcile {
            trigger: Trigger::TimerExpired,
            expected: Some(self.session_id.clone()),
            respond_to: None,
        };
        if sender.send(cmd).await.is_err() {
            debug!(session_id = %self.session_id, "Coordinator channel closed before expiry");
        }
    }
}
