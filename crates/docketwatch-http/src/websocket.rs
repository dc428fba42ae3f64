//! WebSocket stream of EventBus events.
//!
//! Clients connect to `/ws/events` and receive every event until they send
//! a `{"subscribe": "<pattern>"}`; after that only matching events are sent.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;

use crate::HttpState;

/// Filter change sent by the client.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum ClientMessage {
    Subscribe { subscribe: String },
    Unsubscribe { unsubscribe: String },
}

/// Event frame sent to the client.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WsEvent {
    event_type: String,
    payload: serde_json::Value,
}

/// Handler for GET /ws/events
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<HttpState>) {
    let (mut sender, mut receiver) = socket.split();
    let subscriptions: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut event_rx = state.context.event_bus.subscribe();

    let subs = Arc::clone(&subscriptions);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { subscribe }) => {
                    log::debug!("WebSocket subscribed to {}", subscribe);
                    lock(&subs).insert(subscribe);
                }
                Ok(ClientMessage::Unsubscribe { unsubscribe }) => {
                    log::debug!("WebSocket unsubscribed from {}", unsubscribe);
                    lock(&subs).remove(&unsubscribe);
                }
                Err(_) => log::debug!("Ignoring WebSocket message: {}", text.as_str()),
            }
        }
    });

    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let wanted = {
                        let subs = lock(&subscriptions);
                        subs.is_empty() || subs.iter().any(|p| matches_pattern(&event.event_type, p))
                    };
                    if !wanted {
                        continue;
                    }

                    let frame = WsEvent {
                        event_type: event.event_type,
                        payload: event.payload,
                    };
                    if let Ok(json) = serde_json::to_string(&frame) {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    log::warn!("WebSocket client lagged by {} events", count);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::select! {
        _ = recv_task => {},
        _ = send_task => {},
    }
    log::debug!("WebSocket connection closed");
}

fn lock(subs: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    subs.lock().unwrap_or_else(|e| e.into_inner())
}

/// Check if an event type matches a subscription pattern.
///
/// `*` matches one `:`-separated segment; a trailing `:*` matches any suffix.
fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    if event_type == pattern {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(":*") {
        if event_type.starts_with(prefix) && event_type[prefix.len()..].starts_with(':') {
            return true;
        }
    }

    if pattern.contains('*') {
        let pattern_parts: Vec<&str> = pattern.split(':').collect();
        let event_parts: Vec<&str> = event_type.split(':').collect();
        return pattern_parts.len() == event_parts.len()
            && pattern_parts
                .iter()
                .zip(&event_parts)
                .all(|(p, e)| *p == "*" || p == e);
    }

    false
}

// ============================================================================
// TESTS
// ============================================================================
