//! In-process event broadcasting.
//!
//! Session lifecycle, daemon state changes and watch events are all published
//! here. The HTTP layer forwards them to WebSocket clients; anything else in
//! the process can subscribe as well.
//!
//! Event types in use:
//!
//! - `session:created`, `session:closed`, `session:expired`
//! - `daemon:state`
//! - `watch:event:<watch_type>` (e.g. `watch:event:signature_blocks`)

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events beyond this many unread cause slow subscribers to lag.
const DEFAULT_CAPACITY: usize = 1024;

/// An event type plus its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Broadcast channel shared by every publisher in the process.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers it reached.
    ///
    /// Publishing never fails the caller: with no subscribers the event is
    /// dropped, and an unserializable payload is logged and dropped.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize {} payload: {}", event_type, e);
                return 0;
            }
        };
        self.sender
            .send(BroadcastEvent::new(event_type, payload))
            .unwrap_or(0)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.emit("daemon:state", &json!({"state": "running"})), 0);
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(rx);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn every_subscriber_sees_each_event_in_order() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.emit("watch:event:deadlines", &json!({"n": 1})), 2);
        bus.emit("watch:event:deadlines", &json!({"n": 2}));

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.event_type, "watch:event:deadlines");
            assert_eq!(first.payload["n"], 1);
            assert_eq!(second.payload["n"], 2);
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        let _early = bus.subscribe();
        bus.emit("session:created", &json!({}));

        let mut late = bus.subscribe();
        bus.emit("session:closed", &json!({}));
        assert_eq!(late.recv().await.unwrap().event_type, "session:closed");
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for n in 0..3 {
            bus.emit("daemon:state", &json!({ "n": n }));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }
}
