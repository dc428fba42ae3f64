//! Per-watch-type poll state and baselines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{Event, WatchItem, WatchType};

/// Poll state of one watch type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    Idle,
    Polling,
    Failed,
}

#[derive(Debug)]
struct Subscription {
    state: WatchState,
    /// `None` until the first successful poll seeds it.
    baseline: Option<HashSet<String>>,
    last_poll_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    events_emitted: u64,
}

impl Subscription {
    fn new(baseline: Option<HashSet<String>>) -> Self {
        Self {
            state: WatchState::Idle,
            baseline,
            last_poll_at: None,
            last_error: None,
            events_emitted: 0,
        }
    }
}

/// Observable snapshot of one watch type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub watch_type: WatchType,
    pub state: WatchState,
    pub seeded: bool,
    pub baseline_size: usize,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub events_emitted: u64,
}

/// One subscription per configured watch type.
///
/// Every transition happens inside a single critical section, so a baseline
/// read and its replacement can never be split by another poll.
pub struct WatcherRegistry {
    subscriptions: Mutex<BTreeMap<WatchType, Subscription>>,
}

impl WatcherRegistry {
    /// Register `types`, restoring any baselines in `persisted`.
    pub fn new(types: &[WatchType], persisted: &HashMap<WatchType, Vec<String>>) -> Self {
        let subscriptions = types
            .iter()
            .map(|t| {
                let baseline = persisted.get(t).map(|ids| ids.iter().cloned().collect());
                (*t, Subscription::new(baseline))
            })
            .collect();
        Self {
            subscriptions: Mutex::new(subscriptions),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<WatchType, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn watch_types(&self) -> Vec<WatchType> {
        self.lock().keys().copied().collect()
    }

    /// Move `watch_type` to `Polling`.
    ///
    /// Returns false, leaving the state alone, if a poll of that type is still
    /// outstanding or the type is not registered.
    pub fn begin_poll(&self, watch_type: WatchType) -> bool {
        let mut subs = self.lock();
        match subs.get_mut(&watch_type) {
            Some(sub) if sub.state == WatchState::Polling => {
                log::debug!("Previous {} poll still running; skipping tick", watch_type);
                false
            }
            Some(sub) => {
                sub.state = WatchState::Polling;
                true
            }
            None => false,
        }
    }

    /// Record a successful poll and return the event for new items, if any.
    ///
    /// The first successful poll only seeds the baseline. Later polls emit
    /// the items missing from the baseline. Either way the baseline becomes
    /// exactly the ids in `items`.
    pub fn complete_poll(&self, watch_type: WatchType, items: Vec<WatchItem>) -> Option<Event> {
        let mut subs = self.lock();
        let sub = subs.get_mut(&watch_type)?;

        let current: HashSet<String> = items.iter().map(|i| i.id.clone()).collect();
        let previous = sub.baseline.replace(current);
        sub.state = WatchState::Idle;
        sub.last_poll_at = Some(Utc::now());
        sub.last_error = None;

        let Some(previous) = previous else {
            log::info!("Seeded {} baseline with {} item(s)", watch_type, items.len());
            return None;
        };

        let new_items: Vec<_> = items
            .into_iter()
            .filter(|i| !previous.contains(&i.id))
            .map(|i| i.data)
            .collect();
        if new_items.is_empty() {
            return None;
        }
        sub.events_emitted += 1;
        Some(Event::new(watch_type, new_items))
    }

    /// Record a failed poll. The baseline is left untouched.
    pub fn fail_poll(&self, watch_type: WatchType, error: impl Into<String>) {
        let mut subs = self.lock();
        if let Some(sub) = subs.get_mut(&watch_type) {
            sub.state = WatchState::Failed;
            sub.last_poll_at = Some(Utc::now());
            sub.last_error = Some(error.into());
        }
    }

    /// Forget an outstanding poll that was cancelled before it finished.
    pub fn abandon_poll(&self, watch_type: WatchType) {
        let mut subs = self.lock();
        if let Some(sub) = subs.get_mut(&watch_type) {
            if sub.state == WatchState::Polling {
                sub.state = WatchState::Idle;
            }
        }
    }

    pub fn state(&self, watch_type: WatchType) -> Option<WatchState> {
        self.lock().get(&watch_type).map(|s| s.state)
    }

    /// Sorted baseline ids of a seeded watch type.
    pub fn baseline(&self, watch_type: WatchType) -> Option<Vec<String>> {
        let subs = self.lock();
        let mut ids: Vec<String> = subs.get(&watch_type)?.baseline.as_ref()?.iter().cloned().collect();
        ids.sort();
        Some(ids)
    }

    /// All seeded baselines, for persistence.
    pub fn baselines(&self) -> HashMap<WatchType, Vec<String>> {
        self.watch_types()
            .into_iter()
            .filter_map(|t| self.baseline(t).map(|ids| (t, ids)))
            .collect()
    }

    pub fn status(&self) -> Vec<WatcherStatus> {
        self.lock()
            .iter()
            .map(|(t, sub)| WatcherStatus {
                watch_type: *t,
                state: sub.state,
                seeded: sub.baseline.is_some(),
                baseline_size: sub.baseline.as_ref().map_or(0, HashSet::len),
                last_poll_at: sub.last_poll_at,
                last_error: sub.last_error.clone(),
                events_emitted: sub.events_emitted,
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
