//! Durable session store.
//!
//! Holds at most one "current" session plus the append-only history of
//! closed sessions. The coordinator actor is the only writer; everything else
//! reads through the coordinator handle.
//!
//! Implementations must be read-through: another process (an OS extension
//! shim, or this daemon after a restart) has to observe the last write.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use shieldpass_core::Session;
use thiserror::Error;

/// Errors raised by a session store.
///
/// Any of these during `start_session` means the shield stays up.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence contract for the current-session slot and history log.
///
/// No multi-key atomicity is assumed: the coordinator orders its writes so
/// a crash between any two calls leaves a recoverable state.
pub trait SessionStore: Send + Sync {
    /// Returns the current session, if any.
    fn get_current(&self) -> StoreResult<Option<Session>>;

    /// Replaces the current session.
    fn set_current(&self, session: &Session) -> StoreResult<()>;

    /// Clears the current session. Clearing an empty slot is a no-op.
    fn clear_current(&self) -> StoreResult<()>;

    /// Appends a closed session to history.
    ///
    /// Appending a session whose id is already present is a no-op, so a
    /// close interrupted between append and clear can be replayed.
    fn append_to_history(&self, session: &Session) -> StoreResult<()>;

    /// Returns every closed session, oldest first.
    fn all_history(&self) -> StoreResult<Vec<Session>>;
}
