//! Automation capability: the seam between docketwatch and the browser driver.
//!
//! Everything that touches the external case-management portal goes through
//! the [`Automation`] trait. The core never knows how a click or a form fill
//! happens; it only asks a backend to authenticate, run a named operation,
//! and release the browser context afterwards.
//!
//! Backends:
//! - [`DriverClient`] talks JSON over HTTP to an external driver process
//! - [`MemoryAutomation`] is a scripted in-memory backend for tests and dry runs
//! - [`TimedAutomation`] wraps any backend and bounds every call with a deadline

mod driver;
mod memory;
mod timed;

pub use driver::DriverClient;
pub use memory::{AutomationCall, MemoryAutomation};
pub use timed::TimedAutomation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Opaque identifier of an authenticated browser context held by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutomationHandle(pub String);

impl std::fmt::Display for AutomationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Portal login credentials.
///
/// The password is accepted on input but never serialized or printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a backend should obtain an authenticated context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Log in with user credentials in a fresh browser context.
    Credentials(Credentials),
    /// Attach to an externally managed, already logged-in browser.
    BrowserEndpoint(String),
}

impl AuthMode {
    /// Identity used for logging and session ownership.
    pub fn identity(&self) -> &str {
        match self {
            AuthMode::Credentials(creds) => &creds.login,
            AuthMode::BrowserEndpoint(endpoint) => endpoint,
        }
    }
}

/// Failures reported by an automation backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutomationError {
    #[error("Authentication rejected: {0}")]
    AuthenticationFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Automation failed: {0}")]
    Failed(String),

    #[error("Automation call timed out after {0:?}")]
    Timeout(Duration),
}

/// Capability to act on the external system on behalf of an authenticated user.
///
/// Implementations are expected to tolerate one in-flight call per handle;
/// callers are responsible for not issuing concurrent calls on the same handle.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Establish an authenticated browser context.
    ///
    /// On failure no context is left behind.
    async fn authenticate(&self, auth: &AuthMode) -> Result<AutomationHandle, AutomationError>;

    /// Run a named operation against the portal and return its parsed result.
    async fn execute(
        &self,
        handle: &AutomationHandle,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AutomationError>;

    /// Close the browser context behind `handle`.
    async fn release(&self, handle: AutomationHandle) -> Result<(), AutomationError>;
}
