//! Per-session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use uuid::Uuid;

use crate::automation::AutomationHandle;

/// Unique identifier for a session.
///
/// Random v4 UUIDs, so an id is never handed out twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An authenticated portal session owned by the `SessionManager`.
///
/// The automation handle sits behind an async lock: holding the lock is what
/// "using" the session means. `None` inside the lock marks a session whose
/// handle has already been released.
pub struct Session {
    pub id: SessionId,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    last_used: Mutex<Instant>,
    pub(super) handle: Arc<tokio::sync::Mutex<Option<AutomationHandle>>>,
}

impl Session {
    pub(super) fn new(id: SessionId, owner: String, handle: AutomationHandle) -> Self {
        Self {
            id,
            owner,
            created_at: Utc::now(),
            last_used: Mutex::new(Instant::now()),
            handle: Arc::new(tokio::sync::Mutex::new(Some(handle))),
        }
    }

    /// Record use of the session now.
    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Time since the session was last used.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            owner: self.owner.clone(),
            created_at: self.created_at,
            idle_seconds: self.idle_for().as_secs(),
        }
    }
}

/// Exclusive use of a session for the duration of one request.
///
/// While a lease is alive, other requests on the same session wait and the
/// expiry sweep leaves the session alone. Dropping the lease records the use.
pub struct SessionLease {
    session: Arc<Session>,
    guard: OwnedMutexGuard<Option<AutomationHandle>>,
}

impl SessionLease {
    /// Build a lease; `None` if the session's handle was already released.
    pub(super) fn new(
        session: Arc<Session>,
        guard: OwnedMutexGuard<Option<AutomationHandle>>,
    ) -> Option<Self> {
        if guard.is_none() {
            return None;
        }
        Some(Self { session, guard })
    }

    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn owner(&self) -> &str {
        &self.session.owner
    }

    pub fn handle(&self) -> &AutomationHandle {
        // Construction guarantees the slot is filled and nobody can take it
        // while this guard is held.
        self.guard
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease over a released session"))
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.session.touch();
    }
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub idle_seconds: u64,
}
