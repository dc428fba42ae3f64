//! Change detection for the monitoring daemon.
//!
//! Each [`WatchType`] maps to a read-only portal query. The
//! [`WatcherRegistry`] keeps one baseline per type and turns query results
//! into [`Event`]s carrying only the items that were not seen before.

mod registry;

pub use registry::{WatchState, WatcherRegistry, WatcherStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Category of portal change the daemon can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchType {
    /// New processes received in the inbox.
    ReceivedProcesses,
    /// Signature blocks waiting to be signed.
    SignatureBlocks,
    /// Approaching procedural deadlines.
    Deadlines,
}

impl WatchType {
    pub const ALL: [WatchType; 3] = [
        WatchType::ReceivedProcesses,
        WatchType::SignatureBlocks,
        WatchType::Deadlines,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WatchType::ReceivedProcesses => "received_processes",
            WatchType::SignatureBlocks => "signature_blocks",
            WatchType::Deadlines => "deadlines",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Catalog operation used to poll this watch type.
    pub fn query_operation(self) -> &'static str {
        match self {
            WatchType::ReceivedProcesses => "list_received_processes",
            WatchType::SignatureBlocks => "list_signature_blocks",
            WatchType::Deadlines => "list_deadlines",
        }
    }

    /// EventBus event type for events of this watch type.
    pub fn event_topic(self) -> String {
        format!("watch:event:{}", self.as_str())
    }
}

impl std::fmt::Display for WatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a query result, keyed by its portal identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchItem {
    pub id: String,
    pub data: Value,
}

/// Identifier of a query result item.
///
/// Strings and numbers identify themselves; objects use their `id`, `number`
/// or `processNumber` field, in that order.
pub fn item_id(item: &Value) -> Option<String> {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    match item {
        Value::Object(map) => ["id", "number", "processNumber"]
            .iter()
            .find_map(|key| map.get(*key).and_then(scalar)),
        other => scalar(other),
    }
}

/// Turn a raw query result into identified items.
///
/// `null` counts as an empty result. Items without an identifier are skipped
/// and duplicate identifiers collapse to their first occurrence.
pub fn parse_items(watch_type: WatchType, result: Value) -> Result<Vec<WatchItem>, String> {
    let raw = match result {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(format!(
                "{} returned {} instead of a list",
                watch_type.query_operation(),
                json_kind(&other)
            ))
        }
    };

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(raw.len());
    for data in raw {
        let Some(id) = item_id(&data) else {
            log::warn!("Ignoring {} item without an identifier: {}", watch_type, data);
            continue;
        };
        if seen.insert(id.clone()) {
            items.push(WatchItem { id, data });
        }
    }
    Ok(items)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Newly appeared items for one watch type. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub watch_type: WatchType,
    pub items: Vec<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(watch_type: WatchType, items: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            watch_type,
            items,
            occurred_at: Utc::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
