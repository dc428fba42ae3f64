//! Shared state for the HTTP server.

use docketwatch_core::DocketContext;

/// Shared state available to all HTTP handlers.
pub struct HttpState {
    /// Core services the handlers forward to.
    pub context: DocketContext,
    /// Bearer token required on every route but `/health`. `None` disables auth.
    pub auth_token: Option<String>,
}

impl HttpState {
    pub fn new(context: DocketContext) -> Self {
        Self {
            context,
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Check a presented token against the configured one.
    pub fn validate_token(&self, token: Option<&str>) -> bool {
        match (&self.auth_token, token) {
            (None, _) => true,
            (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
            (Some(_), None) => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
