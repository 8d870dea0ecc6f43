//! shieldpass Core - Shared types for temporary access sessions
//!
//! This crate provides the core domain types shared between
//! the daemon (shieldpassd), the wire protocol and the CLI.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod clock;
pub mod error;
pub mod interaction;
pub mod session;
pub mod summary;
pub mod trigger;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use interaction::{InteractionEvent, InteractionId, UserAction};
pub use session::{
    format_clock, format_duration_secs, RestorationMethod, Session, SessionId, SessionPhase,
    SessionView,
};
pub use summary::{HistorySummary, InteractionSummary, MethodBreakdown};
pub use trigger::Trigger;
