//! Platform collaborators the coordinator drives.
//!
//! Each is a narrow synchronous trait so the coordinator can hold boxed
//! implementations and tests can substitute recording fakes. All operations
//! are idempotent; the coordinator calls them freely on every reconcile.

mod enforcer;
mod notifier;
mod surface;

pub use enforcer::{EnforcerError, RestrictionEnforcer, ShieldFileEnforcer, ShieldState};
pub use notifier::{NotificationPayload, Notifier, NotifierError, ScheduledNotifier};
pub use surface::{CountdownSnapshot, CountdownSurface, FileCountdownSurface, SurfaceError};
