//! hookrelay application settings
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config_error;
use crate::error::Result;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8420;
pub const DEFAULT_PORT_HTTP: &str = "8420";

pub const DEFAULT_DISPLAY_NAME: &str = "Webhook";
pub const DEFAULT_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_TRANSPORT_BACKOFF_MS: u64 = 2000;
pub const DEFAULT_STATUS_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_NOTIFICATION_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_SESSION_LIFETIME_MS: u64 = 60_000;

/// How a single queue item is retried once handed to the executor.
/// Delays are fixed, not exponential.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub transport_backoff: Duration,
    pub status_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRY_BUDGET,
            transport_backoff: Duration::from_millis(DEFAULT_TRANSPORT_BACKOFF_MS),
            status_backoff: Duration::from_millis(DEFAULT_STATUS_BACKOFF_MS),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Cadence of queue status sessions
#[derive(Clone, Debug, PartialEq)]
pub struct NotifierSettings {
    pub interval: Duration,
    pub session_lifetime: Duration,
    pub result_history: usize,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_NOTIFICATION_INTERVAL_SECONDS),
            session_lifetime: Duration::from_millis(DEFAULT_SESSION_LIFETIME_MS),
            result_history: 100,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliverySettings {
    pub retry: RetryPolicy,
    pub notifier: NotifierSettings,
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    // Retry and status-session timing
    pub delivery: DeliverySettings,

    // Destinations known at startup
    pub relay_config: RelayConfig,
}

/// One configured webhook as the producer stores it
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub rate_limit: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Seconds between queue status refreshes
    #[serde(default = "default_notification_interval")]
    pub notification_interval: u64,
}

fn default_notification_interval() -> u64 {
    DEFAULT_NOTIFICATION_INTERVAL_SECONDS
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            notification_interval: DEFAULT_NOTIFICATION_INTERVAL_SECONDS,
        }
    }
}

/// Full configuration document pushed by the configuration collaborator
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub webhooks: Vec<DestinationConfig>,
    #[serde(default)]
    pub settings: NotificationConfig,
}

impl RelayConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RelayConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Reject malformed entries before they reach the delivery core
    pub fn validate(&self) -> Result<()> {
        for webhook in &self.webhooks {
            validate_destination_url(&webhook.url)?;
        }
        if self.settings.notification_interval == 0 {
            return Err(config_error!("notificationInterval must be at least 1 second"));
        }
        Ok(())
    }

    pub fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.settings.notification_interval)
    }

    /// url -> configured destination; later entries win on duplicate urls
    pub fn by_url(&self) -> HashMap<String, DestinationConfig> {
        self.webhooks
            .iter()
            .map(|webhook| (webhook.url.clone(), webhook.clone()))
            .collect()
    }
}

pub fn validate_destination_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(config_error!("Unsupported scheme '{}' in {}", other, raw)),
    }
}
