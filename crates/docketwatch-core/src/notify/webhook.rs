//! Webhook channel: POSTs each event as JSON.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Channel, NotificationTarget, NotifyError};
use crate::watch::Event;

/// Delivers events to `webhook` targets over HTTP.
#[derive(Clone)]
pub struct WebhookChannel {
    agent: ureq::Agent,
}

impl WebhookChannel {
    pub fn new(io_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(io_timeout).build();
        Self { agent }
    }
}

/// JSON body posted for an event.
pub(crate) fn webhook_payload(event: &Event) -> Value {
    json!({
        "eventId": event.id,
        "type": event.watch_type,
        "items": event.items,
        "occurredAt": event.occurred_at,
    })
}

#[async_trait]
impl Channel for WebhookChannel {
    async fn deliver(&self, event: &Event, target: &NotificationTarget) -> Result<(), NotifyError> {
        let NotificationTarget::Webhook { url } = target else {
            return Err(NotifyError::Rejected(format!("webhook channel cannot deliver to {}", target)));
        };

        let agent = self.agent.clone();
        let url = url.clone();
        let body = webhook_payload(event);
        tokio::task::spawn_blocking(move || match agent.post(&url).send_json(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => {
                Err(NotifyError::Rejected(format!("webhook returned {}", status)))
            }
            Err(ureq::Error::Transport(e)) => Err(NotifyError::Transport(e.to_string())),
        })
        .await
        .map_err(|e| NotifyError::Transport(format!("webhook task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchType;

    #[test]
    fn payload_shape() {
        let event = Event::new(WatchType::Deadlines, vec![json!({"id": "d9", "due": "2026-11-02"})]);
        let body = webhook_payload(&event);
        assert_eq!(body["eventId"], event.id.to_string());
        assert_eq!(body["type"], "deadlines");
        assert_eq!(body["items"][0]["due"], "2026-11-02");
        assert!(body["occurredAt"].is_string());
    }

    #[tokio::test]
    async fn refuses_email_targets() {
        let channel = WebhookChannel::new(Duration::from_secs(1));
        let event = Event::new(WatchType::Deadlines, vec![]);
        let result = channel
            .deliver(&event, &NotificationTarget::Email { to: vec!["a@x.com".into()] })
            .await;
        assert!(matches!(result, Err(NotifyError::Rejected(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let channel = WebhookChannel::new(Duration::from_millis(500));
        let event = Event::new(WatchType::Deadlines, vec![]);
        let target = NotificationTarget::Webhook { url: "http://127.0.0.1:9/hook".into() };
        let result = channel.deliver(&event, &target).await;
        assert!(matches!(result, Err(NotifyError::Transport(_))));
    }
}
