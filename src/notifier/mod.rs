//! Status notifier: queue depth and delivery outcomes for an observer.
//!
//! The dispatcher owns the session bookkeeping (see [`session`]) and talks to
//! whatever implements [`Notifier`]. The built-in sink is [`MemoryNotifier`],
//! which records everything for the HTTP API and mirrors it to `tracing`.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod session;

pub use memory::{MemoryNotifier, NotificationsSnapshot};

/// What a status session displays for one destination
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueStatus {
    pub destination: String,
    pub display_name: String,
    pub queue_position: usize,
    pub estimated_wait_seconds: u64,
}

/// Terminal outcome of one queue item
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeliveryResult {
    pub destination: String,
    pub display_name: String,
    pub success: bool,
    pub detail: String,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifierEvent {
    QueueStatus(QueueStatus),
    QueueCleared { destination: String },
    DeliveryResult(DeliveryResult),
}

/// Sink for everything the delivery core wants a user to see
pub trait Notifier: Send + Sync {
    fn show_queue_status(&self, status: &QueueStatus);
    fn clear_queue_status(&self, destination: &str);
    fn show_delivery_result(&self, result: &DeliveryResult);
}

/// Whole seconds until the last queued item goes out:
/// `max(0, rate_limit - elapsed) + (position - 1) * rate_limit`, rounded up.
/// `elapsed` of `None` means the destination never sent anything.
pub fn estimate_wait_seconds(
    rate_limit: Duration,
    elapsed: Option<Duration>,
    queue_position: usize,
) -> u64 {
    let head_wait = match elapsed {
        Some(elapsed) => rate_limit.saturating_sub(elapsed),
        None => Duration::ZERO,
    };
    let behind = u32::try_from(queue_position.saturating_sub(1)).unwrap_or(u32::MAX);
    let total_ms = head_wait.as_millis() + rate_limit.as_millis() * u128::from(behind);
    let secs = total_ms.div_ceil(1000);
    u64::try_from(secs).unwrap_or(u64::MAX)
}
