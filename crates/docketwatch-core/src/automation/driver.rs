//! HTTP client for an external browser-automation driver.
//!
//! The driver is a separate process that owns the real browser. It exposes:
//!
//! - `POST   {base}/contexts`                              -> `{"handle": "..."}`
//! - `POST   {base}/contexts/{handle}/operations/{name}`   -> operation result (JSON)
//! - `DELETE {base}/contexts/{handle}`
//!
//! Errors come back as non-2xx statuses with an optional `{"error": "..."}` body.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{AuthMode, Automation, AutomationError, AutomationHandle};

/// [`Automation`] backend that forwards calls to a driver over HTTP.
#[derive(Clone)]
pub struct DriverClient {
    base_url: String,
    agent: ureq::Agent,
}

impl DriverClient {
    /// Create a client for the driver at `base_url` (e.g. `http://127.0.0.1:4455`).
    ///
    /// `io_timeout` bounds each HTTP exchange; the caller is still expected to
    /// wrap the client in a `TimedAutomation` for an overall deadline.
    pub fn new(base_url: impl Into<String>, io_timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(io_timeout).build();
        Self { base_url, agent }
    }

    fn contexts_url(&self) -> String {
        format!("{}/contexts", self.base_url)
    }

    fn context_url(&self, handle: &AutomationHandle) -> String {
        format!("{}/contexts/{}", self.base_url, handle.0)
    }

    fn operation_url(&self, handle: &AutomationHandle, operation: &str) -> String {
        format!("{}/contexts/{}/operations/{}", self.base_url, handle.0, operation)
    }
}

/// Request body for opening a context.
fn auth_body(auth: &AuthMode) -> Value {
    match auth {
        AuthMode::Credentials(creds) => json!({
            "mode": "credentials",
            "login": creds.login,
            "password": creds.password,
        }),
        AuthMode::BrowserEndpoint(endpoint) => json!({
            "mode": "browser_endpoint",
            "endpoint": endpoint,
        }),
    }
}

/// Map a driver error status to an [`AutomationError`].
fn status_error(status: u16, message: String) -> AutomationError {
    match status {
        401 | 403 => AutomationError::AuthenticationFailed(message),
        404 => AutomationError::NotFound(message),
        _ => AutomationError::Failed(format!("driver returned {}: {}", status, message)),
    }
}

/// Extract a readable message from a driver error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn map_ureq_error(err: ureq::Error) -> AutomationError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            status_error(status, error_message(&body))
        }
        ureq::Error::Transport(transport) => {
            AutomationError::Failed(format!("driver unreachable: {}", transport))
        }
    }
}

/// Run a blocking driver exchange on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, AutomationError>
where
    F: FnOnce() -> Result<T, AutomationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AutomationError::Failed(format!("driver task failed: {}", e)))?
}

#[async_trait]
impl Automation for DriverClient {
    async fn authenticate(&self, auth: &AuthMode) -> Result<AutomationHandle, AutomationError> {
        let agent = self.agent.clone();
        let url = self.contexts_url();
        let body = auth_body(auth);

        let response: Value = blocking(move || {
            agent
                .post(&url)
                .send_json(body)
                .map_err(map_ureq_error)?
                .into_json()
                .map_err(|e| AutomationError::Failed(format!("invalid driver response: {}", e)))
        })
        .await?;

        response
            .get("handle")
            .and_then(|h| h.as_str())
            .map(|h| AutomationHandle(h.to_string()))
            .ok_or_else(|| AutomationError::Failed("driver response missing handle".to_string()))
    }

    async fn execute(
        &self,
        handle: &AutomationHandle,
        operation: &str,
        params: Value,
    ) -> Result<Value, AutomationError> {
        let agent = self.agent.clone();
        let url = self.operation_url(handle, operation);

        blocking(move || {
            let response = agent.post(&url).send_json(params).map_err(map_ureq_error)?;
            let body = response
                .into_string()
                .map_err(|e| AutomationError::Failed(format!("failed to read driver response: {}", e)))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body)
                .map_err(|e| AutomationError::Failed(format!("invalid driver response: {}", e)))
        })
        .await
    }

    async fn release(&self, handle: AutomationHandle) -> Result<(), AutomationError> {
        let agent = self.agent.clone();
        let url = self.context_url(&handle);

        blocking(move || {
            agent.delete(&url).call().map_err(map_ureq_error)?;
            Ok(())
        })
        .await
    }
}
