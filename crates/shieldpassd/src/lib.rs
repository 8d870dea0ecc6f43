//! shieldpass daemon library.
//!
//! Owns the temporary-pause lifecycle: a durable session record, a single
//! coordinator that restores the block exactly once no matter which wake-up
//! path fires first, a live countdown, the scheduled notification, orphan
//! repair, and an analytics log. Clients and OS extension shims talk to it
//! over a Unix socket.

pub mod analytics;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod countdown;
pub mod orphan;
pub mod server;
pub mod store;
pub mod testing;
