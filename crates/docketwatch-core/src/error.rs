//! Error taxonomy shared by every docketwatch interface.
//!
//! Lower layers have their own error types (`AutomationError`,
//! `NotifyError`). Everything that crosses the service boundary is turned
//! into a [`DocketError`], which knows its HTTP status code so interfaces
//! never have to re-classify failures.

use thiserror::Error;

use crate::automation::AutomationError;

/// Errors surfaced to API callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocketError {
    /// Bad or missing input. Recoverable by the caller.
    #[error("{message}")]
    Validation {
        /// Offending field, when the error is about a single field.
        field: Option<String>,
        message: String,
    },

    /// The operation needs a session and none was supplied.
    #[error("A session is required for this operation; create one with POST /sessions first")]
    SessionRequired,

    /// The supplied session id is unknown, closed, or expired.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The external system rejected the credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The automation capability could not complete the action (includes timeouts).
    #[error("Automation failure: {message}")]
    AutomationFailure { message: String },

    /// Resource or operation does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request conflicts with the current state (e.g. daemon already running).
    #[error("{0}")]
    Conflict(String),
}

impl DocketError {
    /// Validation error for a required field that was absent or empty.
    pub fn missing_field(field: &str) -> Self {
        DocketError::Validation {
            field: Some(field.to_string()),
            message: format!("Missing required field: {}", field),
        }
    }

    /// Validation error not tied to a single field.
    pub fn invalid(message: impl Into<String>) -> Self {
        DocketError::Validation {
            field: None,
            message: message.into(),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            DocketError::Validation { .. } => 400,
            DocketError::SessionRequired
            | DocketError::SessionNotFound(_)
            | DocketError::AuthenticationFailed(_) => 401,
            DocketError::NotFound(_) => 404,
            DocketError::Conflict(_) => 409,
            DocketError::AutomationFailure { .. } => 500,
        }
    }
}

impl From<AutomationError> for DocketError {
    fn from(err: AutomationError) -> Self {
        match err {
            AutomationError::AuthenticationFailed(msg) => DocketError::AuthenticationFailed(msg),
            AutomationError::NotFound(msg) => DocketError::NotFound(msg),
            other => DocketError::AutomationFailure {
                message: other.to_string(),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
