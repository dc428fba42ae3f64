//! The recurring poll loop of a running daemon.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::automation::{Automation, AutomationHandle};
use crate::event_bus::EventBus;
use crate::notify::{NotificationDispatcher, NotificationTarget};
use crate::persistence::BaselineStore;
use crate::watch::{parse_items, WatchType, WatcherRegistry};

/// Everything a single poll needs. Shared by all poll tasks of one run.
pub(super) struct PollContext {
    pub automation: Arc<dyn Automation>,
    /// The daemon's own handle. Locked for every call so polls of different
    /// watch types never overlap on it.
    pub handle: Arc<AsyncMutex<AutomationHandle>>,
    pub registry: Arc<WatcherRegistry>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub targets: Vec<NotificationTarget>,
    pub event_bus: Option<Arc<EventBus>>,
    pub store: Option<BaselineStore>,
    /// Persisted baselines of types this run does not watch.
    pub retained: HashMap<WatchType, Vec<String>>,
    /// Serializes baseline saves so an older snapshot never lands last.
    pub persist_lock: AsyncMutex<()>,
}

impl PollContext {
    /// Poll one watch type. The caller has already moved it to `Polling`.
    pub async fn poll(&self, watch_type: WatchType) {
        let result = {
            let handle = self.handle.lock().await;
            self.automation
                .execute(&handle, watch_type.query_operation(), json!({}))
                .await
        };

        let items = match result
            .map_err(|e| e.to_string())
            .and_then(|value| parse_items(watch_type, value))
        {
            Ok(items) => items,
            Err(error) => {
                log::warn!("Poll of {} failed: {}", watch_type, error);
                self.registry.fail_poll(watch_type, error);
                return;
            }
        };

        // The type is idle again from here on; a slow dispatch below never
        // holds back its next poll.
        let event = self.registry.complete_poll(watch_type, items);
        self.persist().await;

        let Some(event) = event else { return };
        log::info!(
            "Event {} for {}: {} new item(s)",
            event.id,
            watch_type,
            event.items.len()
        );
        if let Some(bus) = &self.event_bus {
            bus.emit(&watch_type.event_topic(), &event);
        }
        let reports = self.dispatcher.dispatch(&event, &self.targets).await;
        let failed = reports.iter().filter(|r| !r.delivered).count();
        if failed > 0 {
            log::debug!("Event {}: {} of {} deliveries failed", event.id, failed, reports.len());
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.store else { return };
        let _guard = self.persist_lock.lock().await;
        let mut baselines = self.retained.clone();
        baselines.extend(self.registry.baselines());
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.save(&baselines)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Failed to persist baselines: {}", e),
            Err(e) => log::warn!("Baseline save task failed: {}", e),
        }
    }
}

/// Tick every `interval` until `stop` fires, starting one poll task per
/// watch type that is not still polling.
///
/// The first tick fires immediately, which seeds fresh baselines. On stop,
/// outstanding polls are aborted and drained before this returns, so the
/// caller may release the handle right after.
pub(super) async fn run(ctx: Arc<PollContext>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut polls = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                for watch_type in ctx.registry.watch_types() {
                    if !ctx.registry.begin_poll(watch_type) {
                        continue;
                    }
                    let ctx = Arc::clone(&ctx);
                    polls.spawn(async move { ctx.poll(watch_type).await });
                }
            }
            Some(joined) = polls.join_next(), if !polls.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        log::error!("Poll task panicked: {}", e);
                    }
                }
            }
        }
    }

    polls.abort_all();
    while polls.join_next().await.is_some() {}
    for watch_type in ctx.registry.watch_types() {
        ctx.registry.abandon_poll(watch_type);
    }
    log::debug!("Poll loop drained");
}
