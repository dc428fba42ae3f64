//! Deadline wrapper for automation backends.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{AuthMode, Automation, AutomationError, AutomationHandle};

/// Bounds every call to the wrapped backend with a fixed timeout.
///
/// An elapsed deadline surfaces as [`AutomationError::Timeout`]; the pending
/// call is dropped.
pub struct TimedAutomation {
    inner: Arc<dyn Automation>,
    timeout: Duration,
}

impl TimedAutomation {
    pub fn new(inner: Arc<dyn Automation>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Automation for TimedAutomation {
    async fn authenticate(&self, auth: &AuthMode) -> Result<AutomationHandle, AutomationError> {
        tokio::time::timeout(self.timeout, self.inner.authenticate(auth))
            .await
            .map_err(|_| AutomationError::Timeout(self.timeout))?
    }

    async fn execute(
        &self,
        handle: &AutomationHandle,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AutomationError> {
        tokio::time::timeout(self.timeout, self.inner.execute(handle, operation, params))
            .await
            .map_err(|_| AutomationError::Timeout(self.timeout))?
    }

    async fn release(&self, handle: AutomationHandle) -> Result<(), AutomationError> {
        tokio::time::timeout(self.timeout, self.inner.release(handle))
            .await
            .map_err(|_| AutomationError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{Credentials, MemoryAutomation};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn slow_execute_times_out() {
        let memory = Arc::new(MemoryAutomation::new());
        memory.set_delay(Duration::from_secs(30));
        let timed = TimedAutomation::new(memory.clone(), Duration::from_secs(5));

        let handle = timed
            .authenticate(&AuthMode::Credentials(Credentials::new("u", "p")))
            .await;
        // authenticate is delayed too
        assert_eq!(handle, Err(AutomationError::Timeout(Duration::from_secs(5))));

        memory.set_delay(Duration::ZERO);
        let handle = timed
            .authenticate(&AuthMode::Credentials(Credentials::new("u", "p")))
            .await
            .unwrap();

        memory.set_delay(Duration::from_secs(30));
        let result = timed.execute(&handle, "list_deadlines", json!({})).await;
        assert_eq!(result, Err(AutomationError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let memory = Arc::new(MemoryAutomation::new());
        memory.set_result("list_deadlines", json!(["a"]));
        let timed = TimedAutomation::new(memory.clone(), Duration::from_secs(5));

        let handle = timed
            .authenticate(&AuthMode::Credentials(Credentials::new("u", "p")))
            .await
            .unwrap();
        let result = timed.execute(&handle, "list_deadlines", json!({})).await.unwrap();
        assert_eq!(result, json!(["a"]));

        timed.release(handle.clone()).await.unwrap();
        assert_eq!(memory.release_count(&handle), 1);
    }
}
