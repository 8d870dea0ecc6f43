//! Recording collaborators for tests.
//!
//! Each fake is `Clone` over shared state: hand one clone to the coordinator
//! and keep another to assert on what it was asked to do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::collaborators::{
    CountdownSurface, EnforcerError, NotificationPayload, Notifier, NotifierError,
    RestrictionEnforcer, SurfaceError,
};

pub use crate::analytics::MemoryRecorder;
pub use crate::store::MemoryStore;

// ============================================================================
// Enforcer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcerCall {
    Apply(Vec<String>),
    Remove(Vec<String>),
}

#[derive(Debug)]
struct EnforcerState {
    blocked: bool,
    calls: Vec<EnforcerCall>,
}

/// Enforcer that records calls. Starts blocked.
#[derive(Debug, Clone)]
pub struct RecordingEnforcer {
    state: Arc<Mutex<EnforcerState>>,
    failing: Arc<AtomicBool>,
}

impl Default for RecordingEnforcer {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(EnforcerState {
                blocked: true,
                calls: Vec::new(),
            })),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl RecordingEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the reported state, e.g. to simulate a lost restoration.
    pub fn set_blocked(&self, blocked: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.blocked = blocked;
        }
    }

    /// Makes `apply` and `remove` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().map(|s| s.blocked).unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<EnforcerCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn apply_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EnforcerCall::Apply(_)))
            .count()
    }

    pub fn remove_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EnforcerCall::Remove(_)))
            .count()
    }

    fn record(&self, call: EnforcerCall, blocked: bool) -> Result<(), EnforcerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EnforcerError::State("recording enforcer switched to failing".to_string()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| EnforcerError::State("poisoned".to_string()))?;
        state.calls.push(call);
        state.blocked = blocked;
        Ok(())
    }
}

impl RestrictionEnforcer for RecordingEnforcer {
    fn apply(&self, targets: &[String]) -> Result<(), EnforcerError> {
        self.record(EnforcerCall::Apply(targets.to_vec()), true)
    }

    fn remove(&self, targets: &[String]) -> Result<(), EnforcerError> {
        self.record(EnforcerCall::Remove(targets.to_vec()), false)
    }

    fn currently_blocked(&self) -> Result<bool, EnforcerError> {
        Ok(self.is_blocked())
    }
}

// ============================================================================
// Countdown surface
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Start {
        label: String,
        end: DateTime<Utc>,
    },
    Update {
        remaining_secs: u64,
    },
    End,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<Mutex<Vec<SurfaceCall>>>,
    unsupported: Arc<AtomicBool>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface whose `start` reports `Unsupported`.
    pub fn unsupported() -> Self {
        let surface = Self::default();
        surface.unsupported.store(true, Ordering::SeqCst);
        surface
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Remaining-seconds values pushed by `update`, in order.
    pub fn updates(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Update { remaining_secs } => Some(remaining_secs),
                _ => None,
            })
            .collect()
    }

    pub fn end_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::End))
            .count()
    }

    fn push(&self, call: SurfaceCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl CountdownSurface for RecordingSurface {
    fn start(&self, label: &str, _start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), SurfaceError> {
        if self.unsupported.load(Ordering::SeqCst) {
            return Err(SurfaceError::Unsupported);
        }
        self.push(SurfaceCall::Start {
            label: label.to_string(),
            end,
        });
        Ok(())
    }

    fn update(&self, _end: DateTime<Utc>, remaining_secs: u64) -> Result<(), SurfaceError> {
        self.push(SurfaceCall::Update { remaining_secs });
        Ok(())
    }

    fn end(&self) -> Result<(), SurfaceError> {
        self.push(SurfaceCall::End);
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Debug, Default)]
struct NotifierState {
    pending: HashMap<String, (DateTime<Utc>, NotificationPayload)>,
    scheduled_total: usize,
    cancelled: Vec<String>,
}

/// Notifier that only records; nothing ever fires on its own.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire time of the pending notification `id`.
    pub fn pending(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.pending.get(id).map(|(at, _)| *at))
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn scheduled_total(&self) -> usize {
        self.state.lock().map(|s| s.scheduled_total).unwrap_or(0)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().map(|s| s.cancelled.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn schedule(
        &self,
        id: &str,
        fire_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<(), NotifierError> {
        let mut state = self.state.lock().map_err(|_| NotifierError::Poisoned)?;
        state.pending.insert(id.to_string(), (fire_at, payload));
        state.scheduled_total += 1;
        Ok(())
    }

    fn cancel(&self, id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.remove(id);
            state.cancelled.push(id.to_string());
        }
    }
}
