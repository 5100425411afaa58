//! CLI for this application
//!
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::settings::{self, DeliverySettings, NotifierSettings, RelayConfig, RetryPolicy};

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "hookrelay", version, about = "Rate-limited webhook delivery")]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("HOOKRELAY_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // HTTP API listen port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("HOOKRELAY_HTTP_LISTEN_PORT"),
        help = "Port to bind hookrelay HTTP API server to"
    )]
    pub listen_port: u16,

    // Destinations to load at startup
    #[clap(
        long,
        env("HOOKRELAY_CONFIG"),
        help = "JSON file with {\"webhooks\": [{url, name, rateLimit}], \"settings\": {...}}"
    )]
    pub config: Option<PathBuf>,

    #[clap(
        long,
        default_value = "3",
        env("HOOKRELAY_RETRIES"),
        help = "Retries after the first failed attempt of an item"
    )]
    pub retries: u32,

    #[clap(
        long,
        default_value = "2000",
        env("HOOKRELAY_TRANSPORT_BACKOFF_MS"),
        help = "Wait before retrying after a network error"
    )]
    pub transport_backoff_ms: u64,

    #[clap(
        long,
        default_value = "1000",
        env("HOOKRELAY_STATUS_BACKOFF_MS"),
        help = "Wait before retrying after a non-success HTTP status"
    )]
    pub status_backoff_ms: u64,

    #[clap(
        long,
        default_value = "10000",
        env("HOOKRELAY_REQUEST_TIMEOUT_MS"),
        help = "Per-attempt request timeout"
    )]
    pub request_timeout_ms: u64,

    // Only used when no config file supplies one
    #[clap(
        long,
        default_value = "5",
        env("HOOKRELAY_NOTIFICATION_INTERVAL_SECONDS"),
        help = "Seconds between queue status refreshes"
    )]
    pub notification_interval_seconds: u64,

    #[clap(
        long,
        default_value = "60000",
        env("HOOKRELAY_SESSION_LIFETIME_MS"),
        help = "Queue status sessions stop refreshing after this long"
    )]
    pub session_lifetime_ms: u64,

    #[clap(
        long,
        default_value = "100",
        env("HOOKRELAY_RESULT_HISTORY"),
        help = "Delivery results kept for the notifications endpoint"
    )]
    pub result_history: usize,
}

impl Cli {
    pub fn into_settings(self) -> Result<settings::Settings> {
        let relay_config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => {
                let mut config = RelayConfig::default();
                config.settings.notification_interval = self.notification_interval_seconds;
                config.validate()?;
                config
            }
        };
        Ok(settings::Settings {
            listen_address: self.listen_address,
            listen_port: self.listen_port,
            delivery: DeliverySettings {
                retry: RetryPolicy {
                    retries: self.retries,
                    transport_backoff: Duration::from_millis(self.transport_backoff_ms),
                    status_backoff: Duration::from_millis(self.status_backoff_ms),
                    request_timeout: Duration::from_millis(self.request_timeout_ms),
                },
                notifier: NotifierSettings {
                    interval: relay_config.notification_interval(),
                    session_lifetime: Duration::from_millis(self.session_lifetime_ms),
                    result_history: self.result_history,
                },
            },
            relay_config,
        })
    }
}
