//! Daemon configuration as supplied over the Daemon Control API.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::automation::{AuthMode, Credentials};
use crate::error::DocketError;
use crate::notify::NotificationTarget;
use crate::watch::WatchType;

/// Shortest poll interval accepted.
pub const MIN_INTERVAL_MS: u64 = 1_000;

/// Poll interval used when a config leaves it out.
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

/// What the daemon watches, how often, and who hears about it.
///
/// Serializing never includes the password, so a config can be echoed back
/// to API callers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_endpoint: Option<String>,
    pub watch_types: Vec<WatchType>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub notifications: Vec<NotificationTarget>,
}

impl DaemonConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Check the config can be started as-is.
    pub fn validate(&self) -> Result<(), DocketError> {
        match (&self.credentials, &self.browser_endpoint) {
            (Some(_), Some(_)) => {
                return Err(DocketError::invalid(
                    "Supply either credentials or browserEndpoint, not both",
                ))
            }
            (None, None) => {
                return Err(DocketError::invalid(
                    "Either credentials or browserEndpoint is required",
                ))
            }
            (Some(creds), None) => {
                if creds.login.trim().is_empty() {
                    return Err(DocketError::missing_field("credentials.login"));
                }
                if creds.password.is_empty() {
                    return Err(DocketError::missing_field("credentials.password"));
                }
            }
            (None, Some(endpoint)) => {
                if endpoint.trim().is_empty() {
                    return Err(DocketError::missing_field("browserEndpoint"));
                }
            }
        }

        if self.watch_types.is_empty() {
            return Err(DocketError::missing_field("watchTypes"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.watch_types.iter().find(|t| !seen.insert(**t)) {
            return Err(DocketError::Validation {
                field: Some("watchTypes".to_string()),
                message: format!("Duplicate watch type: {}", dup),
            });
        }

        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(DocketError::Validation {
                field: Some("intervalMs".to_string()),
                message: format!("intervalMs must be at least {}", MIN_INTERVAL_MS),
            });
        }

        for target in &self.notifications {
            target.validate().map_err(|message| DocketError::Validation {
                field: Some("notifications".to_string()),
                message,
            })?;
        }
        Ok(())
    }

    /// Authentication mode for the daemon's own handle.
    ///
    /// Only meaningful on a validated config.
    pub fn auth_mode(&self) -> AuthMode {
        match (&self.credentials, &self.browser_endpoint) {
            (Some(creds), _) => AuthMode::Credentials(creds.clone()),
            (None, Some(endpoint)) => AuthMode::BrowserEndpoint(endpoint.clone()),
            (None, None) => AuthMode::BrowserEndpoint(String::new()),
        }
    }
}
