//! # docketwatch-core
//!
//! Core services for automating a legal case-management portal.
//!
//! This crate knows nothing about HTTP servers or command lines. It provides:
//! - **Sessions**: authenticated portal sessions for API callers, with idle expiry
//! - **Routing**: validation and dispatch of portal operations onto a session
//! - **Watching**: polling of portal lists and detection of new items
//! - **Daemon**: the start/stop lifecycle around the poll loop
//! - **Notifications**: email and webhook delivery of detected events
//!
//! Everything that touches the portal goes through the [`automation::Automation`]
//! trait, so every service can be driven by [`automation::MemoryAutomation`] in tests.

pub mod automation;
pub mod context;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod notify;
pub mod operations;
pub mod paths;
pub mod persistence;
pub mod router;
pub mod session;
pub mod watch;

// Re-export commonly used types
pub use context::{DocketContext, DocketContextBuilder};
pub use daemon::{DaemonConfig, DaemonController, DaemonState, DaemonStatus};
pub use error::DocketError;
pub use router::{RequestRouter, RouteOutcome};
pub use session::{SessionId, SessionManager};
pub use watch::{Event, WatchType};
