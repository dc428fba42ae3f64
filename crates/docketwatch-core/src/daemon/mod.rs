//! The continuous monitoring daemon.
//!
//! A [`DaemonController`] moves through
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. While running it
//! holds its own automation handle, separate from every API session, and
//! polls each configured watch type on a fixed interval.

mod config;
mod controller;
mod poll_loop;

pub use config::{DaemonConfig, DEFAULT_INTERVAL_MS, MIN_INTERVAL_MS};
pub use controller::{DaemonController, DaemonState, DaemonStatus};
