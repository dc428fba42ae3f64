//! DaemonController - start/stop lifecycle of the monitoring daemon.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::config::DaemonConfig;
use super::poll_loop::{self, PollContext};
use crate::automation::{Automation, AutomationHandle};
use crate::error::DocketError;
use crate::event_bus::EventBus;
use crate::notify::NotificationDispatcher;
use crate::persistence::BaselineStore;
use crate::watch::{WatchType, WatcherRegistry, WatcherStatus};

/// Lifecycle state of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by [`DaemonController::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub running: bool,
    pub state: DaemonState,
    pub config: Option<DaemonConfig>,
    pub started_at: Option<DateTime<Utc>>,
    pub watchers: Vec<WatcherStatus>,
}

/// A live run: its poll loop, its handle and its subscriptions.
struct ActiveRun {
    stop_tx: oneshot::Sender<()>,
    loop_task: JoinHandle<()>,
    handle: Arc<AsyncMutex<AutomationHandle>>,
    registry: Arc<WatcherRegistry>,
    started_at: DateTime<Utc>,
}

struct Inner {
    state: DaemonState,
    config: Option<DaemonConfig>,
    run: Option<ActiveRun>,
}

/// The parts of the controller a detached start or stop task needs.
#[derive(Clone)]
struct Core {
    automation: Arc<dyn Automation>,
    dispatcher: Arc<NotificationDispatcher>,
    event_bus: Option<Arc<EventBus>>,
    store: Option<BaselineStore>,
    inner: Arc<Mutex<Inner>>,
}

/// Owns the daemon's configuration, its long-lived automation handle and
/// its poll loop. One instance per process; at most one run at a time.
///
/// The body of a start or a stop runs in its own task. A caller that goes
/// away mid-transition (a dropped request future) leaves that task to
/// finish, so the daemon always settles in `Running` or `Stopped`.
pub struct DaemonController {
    core: Core,
    /// Held for the whole of a start or a stop.
    lifecycle: Arc<AsyncMutex<()>>,
}

impl DaemonController {
    pub fn new(automation: Arc<dyn Automation>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            core: Core {
                automation,
                dispatcher,
                event_bus: None,
                store: None,
                inner: Arc::new(Mutex::new(Inner {
                    state: DaemonState::Stopped,
                    config: None,
                    run: None,
                })),
            },
            lifecycle: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Publish state changes and watch events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.core.event_bus = Some(bus);
        self
    }

    /// Persist baselines in `store` and restore them on start.
    pub fn with_baseline_store(mut self, store: BaselineStore) -> Self {
        self.core.store = Some(store);
        self
    }

    pub fn state(&self) -> DaemonState {
        self.core.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == DaemonState::Running
    }

    /// Stored configuration (never includes the password when serialized).
    pub fn config(&self) -> Option<DaemonConfig> {
        self.core.lock().config.clone()
    }

    pub fn status(&self) -> DaemonStatus {
        self.core.status()
    }

    /// Replace the stored configuration. Rejected unless stopped.
    pub fn update_config(&self, config: DaemonConfig) -> Result<(), DocketError> {
        config.validate()?;
        let mut inner = self.core.lock();
        if inner.state != DaemonState::Stopped {
            return Err(DocketError::Conflict(format!(
                "Daemon is {}; stop it before changing configuration",
                inner.state
            )));
        }
        inner.config = Some(config);
        Ok(())
    }

    /// Start the daemon with `config`, or with the stored config when `None`.
    ///
    /// Rejected with `Conflict` unless stopped; never queued behind another
    /// start or stop.
    pub async fn start(&self, config: Option<DaemonConfig>) -> Result<DaemonStatus, DocketError> {
        let Ok(lifecycle) = Arc::clone(&self.lifecycle).try_lock_owned() else {
            return Err(DocketError::Conflict(format!("Daemon is {}", self.state())));
        };

        let core = self.core.clone();
        let task = tokio::spawn(async move {
            let _lifecycle = lifecycle;
            core.start(config).await
        });
        task.await.unwrap_or_else(|e| {
            log::error!("Daemon start task failed: {}", e);
            Err(DocketError::AutomationFailure {
                message: format!("Daemon start failed: {}", e),
            })
        })
    }

    /// Stop the daemon. A no-op when already stopped.
    ///
    /// The poll loop and its outstanding polls are drained before the
    /// daemon's handle is released.
    pub async fn stop(&self) -> DaemonStatus {
        let lifecycle = Arc::clone(&self.lifecycle).lock_owned().await;

        let core = self.core.clone();
        let task = tokio::spawn(async move {
            let _lifecycle = lifecycle;
            core.stop().await
        });
        match task.await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Daemon stop task failed: {}", e);
                self.status()
            }
        }
    }

    /// Stop the daemon as part of process shutdown.
    pub async fn shutdown(&self) {
        self.stop().await;
    }
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a state change. Must be called with `inner` held.
    fn transition(&self, inner: &mut Inner, state: DaemonState) {
        log::info!("Daemon {} -> {}", inner.state, state);
        inner.state = state;
        if let Some(bus) = &self.event_bus {
            bus.emit(
                "daemon:state",
                &json!({ "state": state, "running": state == DaemonState::Running }),
            );
        }
    }

    fn status(&self) -> DaemonStatus {
        let inner = self.lock();
        DaemonStatus {
            running: inner.state == DaemonState::Running,
            state: inner.state,
            config: inner.config.clone(),
            started_at: inner.run.as_ref().map(|r| r.started_at),
            watchers: inner
                .run
                .as_ref()
                .map(|r| r.registry.status())
                .unwrap_or_default(),
        }
    }

    async fn start(&self, config: Option<DaemonConfig>) -> Result<DaemonStatus, DocketError> {
        if let Some(config) = &config {
            config.validate()?;
        }

        let config = {
            let mut inner = self.lock();
            if inner.state != DaemonState::Stopped {
                return Err(DocketError::Conflict(format!("Daemon is already {}", inner.state)));
            }
            if let Some(config) = config {
                inner.config = Some(config);
            }
            let config = inner.config.clone().ok_or_else(|| {
                DocketError::invalid("No daemon configuration; supply one or PUT /daemon/config first")
            })?;
            self.transition(&mut inner, DaemonState::Starting);
            config
        };

        let handle = match self.automation.authenticate(&config.auth_mode()).await {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Daemon authentication failed: {}", e);
                let mut inner = self.lock();
                self.transition(&mut inner, DaemonState::Stopped);
                return Err(DocketError::from(e));
            }
        };

        // Baselines of types this run does not watch are written back
        // untouched on every save.
        let (persisted, retained): (HashMap<_, _>, HashMap<_, _>) = self
            .load_baselines()
            .await
            .into_iter()
            .partition(|(t, _)| config.watch_types.contains(t));
        let registry = Arc::new(WatcherRegistry::new(&config.watch_types, &persisted));
        let handle = Arc::new(AsyncMutex::new(handle));

        let ctx = Arc::new(PollContext {
            automation: Arc::clone(&self.automation),
            handle: Arc::clone(&handle),
            registry: Arc::clone(&registry),
            dispatcher: Arc::clone(&self.dispatcher),
            targets: config.notifications.clone(),
            event_bus: self.event_bus.clone(),
            store: self.store.clone(),
            retained,
            persist_lock: AsyncMutex::new(()),
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        let loop_task = tokio::spawn(poll_loop::run(ctx, config.interval(), stop_rx));

        {
            let mut inner = self.lock();
            inner.run = Some(ActiveRun {
                stop_tx,
                loop_task,
                handle,
                registry,
                started_at: Utc::now(),
            });
            self.transition(&mut inner, DaemonState::Running);
        }
        log::info!(
            "Daemon watching {:?} every {}ms",
            config.watch_types,
            config.interval_ms
        );
        Ok(self.status())
    }

    async fn stop(&self) -> DaemonStatus {
        let run = {
            let mut inner = self.lock();
            match inner.run.take() {
                Some(run) => {
                    self.transition(&mut inner, DaemonState::Stopping);
                    run
                }
                None => return self.stopped_status(&inner),
            }
        };

        let _ = run.stop_tx.send(());
        if let Err(e) = run.loop_task.await {
            log::error!("Poll loop ended abnormally: {}", e);
        }

        let handle = run.handle.lock().await.clone();
        if let Err(e) = self.automation.release(handle).await {
            log::warn!("Failed to release daemon handle: {}", e);
        }

        let mut inner = self.lock();
        self.transition(&mut inner, DaemonState::Stopped);
        self.stopped_status(&inner)
    }

    fn stopped_status(&self, inner: &Inner) -> DaemonStatus {
        DaemonStatus {
            running: inner.state == DaemonState::Running,
            state: inner.state,
            config: inner.config.clone(),
            started_at: None,
            watchers: Vec::new(),
        }
    }

    async fn load_baselines(&self) -> HashMap<WatchType, Vec<String>> {
        let Some(store) = self.store.clone() else {
            return HashMap::new();
        };
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(baselines)) => baselines,
            Ok(Err(e)) => {
                log::warn!("Ignoring unreadable persisted baselines: {}", e);
                HashMap::new()
            }
            Err(e) => {
                log::warn!("Baseline load task failed: {}", e);
                HashMap::new()
            }
        }
    }
}


// ============================================================================
// TESTS
// ============================================================================
