//! Admission webhooks for ControlPlane resources.
//!
//! The server intercepts mutations synchronously before they are persisted;
//! policies answer allow/deny within a hard deadline, failing closed when
//! the deadline is exceeded.

pub mod policies;
pub mod quorum;
pub mod server;
