//! SessionManager - owns every API-facing authenticated portal session.

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use super::state::{Session, SessionId, SessionInfo, SessionLease};
use crate::automation::{AuthMode, Automation, AutomationHandle, Credentials};
use crate::error::DocketError;
use crate::event_bus::EventBus;

/// Default idle time after which a session is closed by the sweep.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Timing configuration for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Why a session is being torn down. Only used for logs and events.
#[derive(Debug, Clone, Copy)]
enum CloseReason {
    Closed,
    Expired,
    Shutdown,
}

impl CloseReason {
    fn event_type(self) -> &'static str {
        match self {
            CloseReason::Closed | CloseReason::Shutdown => "session:closed",
            CloseReason::Expired => "session:expired",
        }
    }
}

type SessionMap = HashMap<SessionId, Arc<Session>>;

/// What the detached authenticate and release tasks need.
#[derive(Clone)]
struct Core {
    automation: Arc<dyn Automation>,
    sessions: Arc<Mutex<SessionMap>>,
    closed: Arc<AtomicBool>,
    event_bus: Option<Arc<EventBus>>,
}

/// Manages all API-facing sessions.
///
/// The session map is only touched inside short synchronous critical
/// sections, so a lookup-and-touch or a remove is never split by an await.
/// Use of a session is exclusive (see [`SessionLease`]), which gives
/// per-session single-flight and keeps the sweep away from busy sessions.
///
/// Authenticating and releasing run in their own tasks. A caller dropped
/// mid-call cannot strand a handle: it is either registered or released.
pub struct SessionManager {
    core: Core,
    config: SessionConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(automation: Arc<dyn Automation>, config: SessionConfig) -> Self {
        Self {
            core: Core {
                automation,
                sessions: Arc::new(Mutex::new(HashMap::new())),
                closed: Arc::new(AtomicBool::new(false)),
                event_bus: None,
            },
            config,
            sweeper: Mutex::new(None),
        }
    }

    /// Publish session lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.core.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Authenticate against the portal and register a new session.
    ///
    /// Nothing is registered when authentication fails.
    pub async fn create_session(&self, credentials: Credentials) -> Result<SessionId, DocketError> {
        if credentials.login.trim().is_empty() {
            return Err(DocketError::missing_field("login"));
        }
        if credentials.password.is_empty() {
            return Err(DocketError::missing_field("password"));
        }
        if self.core.is_closed() {
            return Err(shutting_down());
        }

        let core = self.core.clone();
        tokio::spawn(async move { core.register(credentials).await })
            .await
            .unwrap_or_else(|e| {
                Err(DocketError::AutomationFailure {
                    message: task_failure("Session creation", e),
                })
            })
    }

    /// Look up a session, mark it used, and wait for exclusive use of it.
    pub async fn resolve_session(&self, id: &str) -> Result<SessionLease, DocketError> {
        let session = {
            let map = self.core.map();
            let session = map
                .get(&SessionId::from(id))
                .cloned()
                .ok_or_else(|| DocketError::SessionNotFound(id.to_string()))?;
            session.touch();
            session
        };

        let guard = Arc::clone(&session.handle).lock_owned().await;
        // The session may have been closed while we waited for the lock.
        SessionLease::new(session, guard).ok_or_else(|| DocketError::SessionNotFound(id.to_string()))
    }

    /// Close a session and release its handle.
    ///
    /// Idempotent: unknown or already-closed ids are a no-op. Returns whether
    /// a session was actually closed. Waits for an in-flight request on the
    /// session to finish before releasing.
    pub async fn close_session(&self, id: &str) -> bool {
        let Some(session) = self.core.map().remove(&SessionId::from(id)) else {
            log::debug!("Close of unknown session {} ignored", id);
            return false;
        };

        let core = self.core.clone();
        tokio::spawn(async move { core.finish(&session, CloseReason::Closed).await })
            .await
            .unwrap_or_else(|e| {
                log::error!("{}", task_failure("Session close", e));
                false
            })
    }

    /// Close every session idle for longer than the idle timeout.
    ///
    /// Sessions currently leased are skipped. Returns how many were closed.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<(Arc<Session>, Option<AutomationHandle>)> = {
            let mut map = self.core.map();
            let candidates: Vec<SessionId> = map
                .values()
                .filter(|s| s.idle_for() > self.config.idle_timeout)
                .map(|s| s.id.clone())
                .collect();

            let mut expired = Vec::new();
            for id in candidates {
                let Some(session) = map.get(&id) else { continue };
                let Ok(mut guard) = Arc::clone(&session.handle).try_lock_owned() else {
                    log::debug!("Session {} is in use; skipping expiry", id);
                    continue;
                };
                let handle = guard.take();
                drop(guard);
                if let Some(session) = map.remove(&id) {
                    expired.push((session, handle));
                }
            }
            expired
        };

        let count = expired.len();
        if count == 0 {
            return 0;
        }

        let core = self.core.clone();
        let releases = tokio::spawn(async move {
            for (session, handle) in expired {
                log::info!(
                    "Session {} for {} expired after {:?} idle",
                    session.id,
                    session.owner,
                    session.idle_for()
                );
                if let Some(handle) = handle {
                    core.release_handle(&session.id, handle, CloseReason::Expired).await;
                }
                core.emit(CloseReason::Expired.event_type(), &session.id, &session.owner);
            }
        });
        if let Err(e) = releases.await {
            log::error!("{}", task_failure("Expiry release", e));
        }
        log::debug!("Expiry sweep closed {} session(s)", count);
        count
    }

    /// Start the periodic expiry sweep. Calling it twice has no effect.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut slot = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() || self.core.is_closed() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.sweep_expired().await;
            }
        }));
    }

    /// Snapshots of all live sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.core.map().values().map(|s| s.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.core.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.map().is_empty()
    }

    /// Stop the sweep, refuse new sessions, and close every session.
    ///
    /// The sweep task is cancelled before any handle is released.
    pub async fn shutdown(&self) {
        self.core.closed.store(true, Ordering::SeqCst);

        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = sweeper {
            task.abort();
            let _ = task.await;
        }

        let sessions: Vec<Arc<Session>> = self.core.map().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        let core = self.core.clone();
        let releases = tokio::spawn(async move {
            for session in sessions {
                core.finish(&session, CloseReason::Shutdown).await;
            }
        });
        if let Err(e) = releases.await {
            log::error!("{}", task_failure("Shutdown release", e));
        }
        log::info!("Session manager shut down; closed {} session(s)", count);
    }
}

impl Core {
    fn map(&self) -> MutexGuard<'_, SessionMap> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event_type: &str, id: &SessionId, owner: &str) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event_type, &json!({ "sessionId": id, "owner": owner }));
        }
    }

    async fn register(&self, credentials: Credentials) -> Result<SessionId, DocketError> {
        let owner = credentials.login.clone();
        let handle = self
            .automation
            .authenticate(&AuthMode::Credentials(credentials))
            .await
            .map_err(|e| {
                log::info!("Authentication for {} failed: {}", owner, e);
                DocketError::from(e)
            })?;

        let id = SessionId::new();
        {
            let mut map = self.map();
            // Checked again under the map lock: shutdown drains the map with
            // this same lock held, so a session inserted here is never orphaned.
            if !self.is_closed() {
                map.insert(id.clone(), Arc::new(Session::new(id.clone(), owner.clone(), handle)));
                drop(map);
                log::info!("Session {} created for {}", id, owner);
                self.emit("session:created", &id, &owner);
                return Ok(id);
            }
        }

        self.release_handle(&id, handle, CloseReason::Shutdown).await;
        Err(shutting_down())
    }

    /// Wait out any lease on a removed session, then release its handle.
    ///
    /// Returns false if someone else already released it.
    async fn finish(&self, session: &Session, reason: CloseReason) -> bool {
        let Some(handle) = session.handle.lock().await.take() else {
            return false;
        };
        self.release_handle(&session.id, handle, reason).await;
        self.emit(reason.event_type(), &session.id, &session.owner);
        true
    }

    /// Best-effort release; failures are logged and never propagated.
    async fn release_handle(&self, id: &SessionId, handle: AutomationHandle, reason: CloseReason) {
        match self.automation.release(handle).await {
            Ok(()) => log::info!("Session {} released ({:?})", id, reason),
            Err(e) => log::warn!("Failed to release handle for session {} ({:?}): {}", id, reason, e),
        }
    }
}

fn shutting_down() -> DocketError {
    DocketError::Conflict("Session manager is shutting down".to_string())
}

fn task_failure(what: &str, e: JoinError) -> String {
    format!("{} task failed: {}", what, e)
}

// ============================================================================
// TESTS
// ============================================================================
