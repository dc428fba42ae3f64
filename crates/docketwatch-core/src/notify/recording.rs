//! In-memory channel that records deliveries. Used by tests and dry runs.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{Channel, NotificationTarget, NotifyError};
use crate::watch::Event;

#[derive(Default)]
struct RecordingState {
    delay: Duration,
    failure: Option<NotifyError>,
    attempts: usize,
    delivered: Vec<(Uuid, String, Event)>,
}

/// [`Channel`] that stores every event it is asked to deliver.
#[derive(Default)]
pub struct RecordingChannel {
    state: Mutex<RecordingState>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every delivery with `error` from now on.
    pub fn fail_with(&self, error: NotifyError) {
        self.lock().failure = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Number of deliveries attempted, failed ones included.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Ids of successfully delivered events, in delivery order.
    pub fn delivered_events(&self) -> Vec<Uuid> {
        self.lock().delivered.iter().map(|(id, _, _)| *id).collect()
    }

    /// Successfully delivered events with the target they went to.
    pub fn deliveries(&self) -> Vec<(String, Event)> {
        self.lock()
            .delivered
            .iter()
            .map(|(_, target, event)| (target.clone(), event.clone()))
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn deliver(&self, event: &Event, target: &NotificationTarget) -> Result<(), NotifyError> {
        let delay = {
            let mut state = self.lock();
            state.attempts += 1;
            state.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(error) = &state.failure {
            return Err(error.clone());
        }
        state.delivered.push((event.id, target.to_string(), event.clone()));
        Ok(())
    }
}
