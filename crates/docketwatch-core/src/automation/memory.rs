//! Scripted in-memory automation backend.
//!
//! Used by the test suites and by `--driver-url memory:` dry runs. Every call
//! is recorded so callers can assert on release counts and overlapping use of
//! a handle.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{AuthMode, Automation, AutomationError, AutomationHandle};

/// A call observed by [`MemoryAutomation`].
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationCall {
    Authenticate { identity: String },
    Execute { handle: AutomationHandle, operation: String, params: Value },
    Release { handle: AutomationHandle },
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    delay: Duration,
    release_delay: Duration,
    rejected_logins: HashSet<String>,
    queued: HashMap<String, VecDeque<Result<Value, AutomationError>>>,
    responses: HashMap<String, Result<Value, AutomationError>>,
    open: HashSet<AutomationHandle>,
    releases: HashMap<AutomationHandle, usize>,
    in_flight: HashMap<AutomationHandle, usize>,
    max_in_flight: usize,
    calls: Vec<AutomationCall>,
}

/// In-memory [`Automation`] backend with scripted responses.
///
/// Unscripted `list_*` operations answer `[]`, every other unscripted
/// operation answers `{"success": true}`.
#[derive(Default)]
pub struct MemoryAutomation {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delay applied to every authenticate and execute call.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Delay applied to every release call, after it has been recorded.
    pub fn set_release_delay(&self, delay: Duration) {
        self.lock().release_delay = delay;
    }

    /// Make logins with this identity fail authentication.
    pub fn reject_login(&self, login: &str) {
        self.lock().rejected_logins.insert(login.to_string());
    }

    /// Persistent successful response for an operation.
    pub fn set_result(&self, operation: &str, value: Value) {
        self.set_response(operation, Ok(value));
    }

    /// Persistent response (success or failure) for an operation.
    pub fn set_response(&self, operation: &str, response: Result<Value, AutomationError>) {
        self.lock().responses.insert(operation.to_string(), response);
    }

    /// One-shot response, consumed before any persistent response.
    pub fn push_response(&self, operation: &str, response: Result<Value, AutomationError>) {
        self.lock()
            .queued
            .entry(operation.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every call observed so far, in order.
    pub fn calls(&self) -> Vec<AutomationCall> {
        self.lock().calls.clone()
    }

    /// Number of execute calls for an operation.
    pub fn execute_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, AutomationCall::Execute { operation: op, .. } if op == operation))
            .count()
    }

    /// How many times `handle` has been released.
    pub fn release_count(&self, handle: &AutomationHandle) -> usize {
        self.lock().releases.get(handle).copied().unwrap_or(0)
    }

    /// Handles authenticated and not yet released.
    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    /// Highest number of concurrent execute calls seen on a single handle.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn next_response(&self, operation: &str) -> Result<Value, AutomationError> {
        let mut state = self.lock();
        if let Some(response) = state.queued.get_mut(operation).and_then(|q| q.pop_front()) {
            return response;
        }
        if let Some(response) = state.responses.get(operation) {
            return response.clone();
        }
        if operation.starts_with("list_") {
            Ok(json!([]))
        } else {
            Ok(json!({ "success": true }))
        }
    }

    async fn apply_delay(&self) {
        let delay = self.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Decrements the in-flight counter even when the call future is dropped.
struct InFlight {
    state: Arc<Mutex<MemoryState>>,
    handle: AutomationHandle,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = state.in_flight.get_mut(&self.handle) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl Automation for MemoryAutomation {
    async fn authenticate(&self, auth: &AuthMode) -> Result<AutomationHandle, AutomationError> {
        self.lock().calls.push(AutomationCall::Authenticate {
            identity: auth.identity().to_string(),
        });
        self.apply_delay().await;

        let mut state = self.lock();
        if let AuthMode::Credentials(creds) = auth {
            if creds.password.is_empty() || state.rejected_logins.contains(&creds.login) {
                return Err(AutomationError::AuthenticationFailed(format!(
                    "invalid credentials for {}",
                    creds.login
                )));
            }
        }
        state.next_id += 1;
        let handle = AutomationHandle(format!("mem-{}", state.next_id));
        state.open.insert(handle.clone());
        Ok(handle)
    }

    async fn execute(
        &self,
        handle: &AutomationHandle,
        operation: &str,
        params: Value,
    ) -> Result<Value, AutomationError> {
        {
            let mut state = self.lock();
            state.calls.push(AutomationCall::Execute {
                handle: handle.clone(),
                operation: operation.to_string(),
                params,
            });
            if !state.open.contains(handle) {
                return Err(AutomationError::Failed(format!("unknown handle {}", handle)));
            }
            let count = state.in_flight.entry(handle.clone()).or_insert(0);
            *count += 1;
            let current = *count;
            state.max_in_flight = state.max_in_flight.max(current);
        }
        let _in_flight = InFlight {
            state: Arc::clone(&self.state),
            handle: handle.clone(),
        };

        self.apply_delay().await;
        self.next_response(operation)
    }

    async fn release(&self, handle: AutomationHandle) -> Result<(), AutomationError> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(AutomationCall::Release {
                handle: handle.clone(),
            });
            state.release_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        *state.releases.entry(handle.clone()).or_insert(0) += 1;
        if state.open.remove(&handle) {
            Ok(())
        } else {
            Err(AutomationError::Failed(format!("handle {} already released", handle)))
        }
    }
}
