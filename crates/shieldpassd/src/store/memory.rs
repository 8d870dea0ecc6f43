//! In-memory session store with an availability switch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use shieldpass_core::Session;

use super::{SessionStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    current: Option<Session>,
    history: Vec<Session>,
}

/// `SessionStore` kept in process memory.
///
/// Clones share state, so a test can hand one clone to the coordinator and
/// inspect another. `set_unavailable(true)` makes every call fail with
/// `StoreError::Unavailable`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing history.
    pub fn with_history(history: Vec<Session>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            state.history = history;
        }
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl SessionStore for MemoryStore {
    fn get_current(&self) -> StoreResult<Option<Session>> {
        Ok(self.lock()?.current.clone())
    }

    fn set_current(&self, session: &Session) -> StoreResult<()> {
        self.lock()?.current = Some(session.clone());
        Ok(())
    }

    fn clear_current(&self) -> StoreResult<()> {
        self.lock()?.current = None;
        Ok(())
    }

    fn append_to_history(&self, session: &Session) -> StoreResult<()> {
        let mut state = self.lock()?;
        if !state.history.iter().any(|s| s.id == session.id) {
            state.history.push(session.clone());
        }
        Ok(())
    }

    fn all_history(&self) -> StoreResult<Vec<Session>> {
        Ok(self.lock()?.history.clone())
    }
}
