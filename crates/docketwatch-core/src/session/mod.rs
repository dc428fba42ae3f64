//! API-facing portal sessions.
//!
//! A session binds a caller-visible id to an authenticated automation handle.
//! The [`SessionManager`] owns all of them and is the only place a handle is
//! ever released.

mod manager;
mod state;

pub use manager::{SessionConfig, SessionManager, DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
pub use state::{Session, SessionId, SessionInfo, SessionLease};
