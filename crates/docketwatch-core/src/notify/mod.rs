//! Notification delivery for watch events.
//!
//! A [`NotificationDispatcher`] fans one [`Event`] out to every configured
//! [`NotificationTarget`]. Each target is attempted on its own with its own
//! deadline, and the outcome is reported per target; dispatch itself never
//! fails.

mod recording;
mod sendmail;
mod webhook;

pub use recording::RecordingChannel;
pub use sendmail::{SendmailChannel, DEFAULT_MAIL_FROM, DEFAULT_SENDMAIL_PATH};
pub use webhook::WebhookChannel;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::watch::Event;

/// Default bound on a single delivery.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// Where to deliver events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationTarget {
    /// One message to all recipients.
    Email {
        #[serde(alias = "address", deserialize_with = "one_or_many")]
        to: Vec<String>,
    },
    /// HTTP POST of the event as JSON.
    Webhook { url: String },
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(address) => vec![address],
        OneOrMany::Many(addresses) => addresses,
    })
}

impl NotificationTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationTarget::Email { .. } => "email",
            NotificationTarget::Webhook { .. } => "webhook",
        }
    }

    /// Check the target is deliverable in principle.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            NotificationTarget::Email { to } => {
                if to.is_empty() {
                    return Err("email target needs at least one recipient".to_string());
                }
                match to.iter().find(|addr| !is_email_like(addr)) {
                    Some(bad) => Err(format!("invalid email recipient: {}", bad)),
                    None => Ok(()),
                }
            }
            NotificationTarget::Webhook { url } => {
                if url.starts_with("http://") || url.starts_with("https://") {
                    Ok(())
                } else {
                    Err(format!("webhook url must be http(s): {}", url))
                }
            }
        }
    }
}

fn is_email_like(address: &str) -> bool {
    let address = address.trim();
    match address.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !address.contains(char::is_whitespace),
        None => false,
    }
}

impl std::fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationTarget::Email { to } => write!(f, "email:{}", to.join(",")),
            NotificationTarget::Webhook { url } => write!(f, "webhook:{}", url),
        }
    }
}

/// Delivery failures reported by a channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The target could not be reached at all.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The target was reached and refused the notification.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers events to one kind of target.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn deliver(&self, event: &Event, target: &NotificationTarget) -> Result<(), NotifyError>;
}

/// Outcome of one target for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub target: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Routes events to the channel for each target kind.
pub struct NotificationDispatcher {
    email: Arc<dyn Channel>,
    webhook: Arc<dyn Channel>,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(email: Arc<dyn Channel>, webhook: Arc<dyn Channel>, timeout: Duration) -> Self {
        Self { email, webhook, timeout }
    }

    fn channel(&self, target: &NotificationTarget) -> &Arc<dyn Channel> {
        match target {
            NotificationTarget::Email { .. } => &self.email,
            NotificationTarget::Webhook { .. } => &self.webhook,
        }
    }

    /// Deliver `event` to every target concurrently.
    ///
    /// Returns one report per target, in target order. Failures are logged
    /// and reported, never propagated.
    pub async fn dispatch(&self, event: &Event, targets: &[NotificationTarget]) -> Vec<DeliveryReport> {
        let deliveries = targets.iter().map(|target| async move {
            let result = match tokio::time::timeout(self.timeout, self.channel(target).deliver(event, target)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(self.timeout)),
            };

            match result {
                Ok(()) => {
                    log::info!("Delivered event {} to {}", event.id, target);
                    DeliveryReport {
                        target: target.to_string(),
                        delivered: true,
                        error: None,
                    }
                }
                Err(e) => {
                    log::warn!("Failed to deliver event {} to {}: {}", event.id, target, e);
                    DeliveryReport {
                        target: target.to_string(),
                        delivered: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        });
        join_all(deliveries).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
