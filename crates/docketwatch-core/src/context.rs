//! DocketContext - the shared services every interface works with.
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │      DocketContext       │
//!                 ├──────────────────────────┤
//!                 │  - EventBus              │
//!                 │  - SessionManager        │
//!                 │  - RequestRouter         │
//!                 │  - DaemonController      │
//!                 └────────────┬─────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐              ┌──────────────┐
//!        │ HTTP Server │              │ Process main │
//!        │  (routes)   │              │  (shutdown)  │
//!        └─────────────┘              └──────────────┘
//! ```

use std::sync::Arc;

use crate::automation::Automation;
use crate::daemon::DaemonController;
use crate::event_bus::EventBus;
use crate::notify::{NotificationDispatcher, RecordingChannel, DEFAULT_NOTIFY_TIMEOUT};
use crate::persistence::BaselineStore;
use crate::router::RequestRouter;
use crate::session::{SessionConfig, SessionManager};

/// Builder for [`DocketContext`].
pub struct DocketContextBuilder {
    automation: Arc<dyn Automation>,
    session_config: SessionConfig,
    event_bus: Option<Arc<EventBus>>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
    baseline_store: Option<BaselineStore>,
}

impl DocketContextBuilder {
    /// Start a builder around the automation backend all services share.
    pub fn new(automation: Arc<dyn Automation>) -> Self {
        Self {
            automation,
            session_config: SessionConfig::default(),
            event_bus: None,
            dispatcher: None,
            baseline_store: None,
        }
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Use an existing EventBus.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Persist daemon baselines in `store`.
    pub fn baseline_store(mut self, store: BaselineStore) -> Self {
        self.baseline_store = Some(store);
        self
    }

    /// Build the context. Without a dispatcher, notifications are only
    /// recorded in memory.
    pub fn build(self) -> DocketContext {
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let dispatcher = self.dispatcher.unwrap_or_else(|| {
            let recorder = Arc::new(RecordingChannel::new());
            Arc::new(NotificationDispatcher::new(
                recorder.clone(),
                recorder,
                DEFAULT_NOTIFY_TIMEOUT,
            ))
        });

        let sessions = Arc::new(
            SessionManager::new(Arc::clone(&self.automation), self.session_config)
                .with_event_bus(Arc::clone(&event_bus)),
        );
        let router = Arc::new(RequestRouter::new(
            Arc::clone(&sessions),
            Arc::clone(&self.automation),
        ));
        let mut daemon = DaemonController::new(Arc::clone(&self.automation), dispatcher)
            .with_event_bus(Arc::clone(&event_bus));
        if let Some(store) = self.baseline_store {
            daemon = daemon.with_baseline_store(store);
        }

        DocketContext {
            event_bus,
            sessions,
            router,
            daemon: Arc::new(daemon),
        }
    }
}

/// Shared state handed to every interface.
#[derive(Clone)]
pub struct DocketContext {
    pub event_bus: Arc<EventBus>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<RequestRouter>,
    pub daemon: Arc<DaemonController>,
}

impl DocketContext {
    pub fn builder(automation: Arc<dyn Automation>) -> DocketContextBuilder {
        DocketContextBuilder::new(automation)
    }

    /// Start background work (the session expiry sweep).
    pub fn start_background_tasks(&self) {
        self.sessions.start_sweeper();
    }

    /// Stop the daemon, then close every session.
    ///
    /// Each step drains its own timers before releasing handles.
    pub async fn shutdown(&self) {
        self.daemon.shutdown().await;
        self.sessions.shutdown().await;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{Credentials, MemoryAutomation};
    use crate::daemon::DaemonConfig;
    use crate::watch::WatchType;

    #[tokio::test]
    async fn services_share_one_event_bus() {
        let memory = Arc::new(MemoryAutomation::new());
        let ctx = DocketContext::builder(memory).build();
        let mut rx = ctx.event_bus.subscribe();

        ctx.sessions
            .create_session(Credentials::new("lawyer", "pw"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().event_type, "session:created");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_everything() {
        let memory = Arc::new(MemoryAutomation::new());
        let ctx = DocketContext::builder(memory.clone()).build();
        ctx.start_background_tasks();

        ctx.sessions
            .create_session(Credentials::new("a", "pw"))
            .await
            .unwrap();
        ctx.daemon
            .start(Some(DaemonConfig {
                credentials: None,
                browser_endpoint: Some("ws://127.0.0.1:9222".into()),
                watch_types: vec![WatchType::Deadlines],
                interval_ms: 1000,
                notifications: vec![],
            }))
            .await
            .unwrap();
        assert_eq!(memory.open_handles(), 2);

        ctx.shutdown().await;
        assert_eq!(memory.open_handles(), 0);
        assert!(!ctx.daemon.is_running());
        assert!(ctx.sessions.is_empty());
    }
}
