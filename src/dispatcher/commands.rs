//! Messages handled by the dispatcher loop.
use serde_json::Value;
use tokio::sync::oneshot;

use crate::registry::DestinationSnapshot;
use crate::settings::RelayConfig;

/// Requests from producers, the configuration layer and the API
#[derive(Debug)]
pub enum DispatchCommand {
    /// Append a payload to a destination's queue.
    /// Missing name or rate limit are looked up in the cached configuration.
    Enqueue {
        destination: String,
        payload: Value,
        display_name: Option<String>,
        rate_limit_seconds: Option<u64>,
    },
    /// Create a destination or change its rate limit in place
    Configure {
        destination: String,
        rate_limit_seconds: u64,
    },
    /// Reconcile against the full configuration document
    ApplyConfig {
        config: RelayConfig,
        resp_chan: oneshot::Sender<()>,
    },
    GetDestination {
        destination: String,
        resp_chan: oneshot::Sender<Option<DestinationSnapshot>>,
    },
    ListDestinations {
        resp_chan: oneshot::Sender<Vec<DestinationSnapshot>>,
    },
}

/// Deferred callbacks posted back to the loop by timer tasks.
/// Ids that no longer match the destination's current timer or session are stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Wake {
    Dispatch { destination: String, timer_id: u64 },
    RefreshStatus { destination: String, session_id: u64 },
    ExpireSession { destination: String, session_id: u64 },
}
