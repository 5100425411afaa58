//! In-process notifier sink backing the `/notifications` endpoint
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{DeliveryResult, Notifier, NotifierEvent, QueueStatus};

const EVENT_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct NotifierState {
    active: BTreeMap<String, QueueStatus>,
    results: VecDeque<DeliveryResult>,
    events: VecDeque<NotifierEvent>,
}

/// What the notifications endpoint returns
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct NotificationsSnapshot {
    pub active: Vec<QueueStatus>,
    pub results: Vec<DeliveryResult>,
}

/// Records the currently displayed queue statuses, a bounded history of
/// delivery results and an ordered event log. Every call is logged too.
#[derive(Debug)]
pub struct MemoryNotifier {
    result_history: usize,
    state: Mutex<NotifierState>,
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MemoryNotifier {
    pub fn new(result_history: usize) -> Self {
        Self {
            result_history,
            state: Mutex::new(NotifierState::default()),
        }
    }

    // A panic while holding the lock leaves plain data behind; keep serving it.
    fn state(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(state: &mut NotifierState, event: NotifierEvent) {
        if state.events.len() == EVENT_LOG_CAPACITY {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    pub fn active_status(&self, destination: &str) -> Option<QueueStatus> {
        self.state().active.get(destination).cloned()
    }

    pub fn results(&self) -> Vec<DeliveryResult> {
        self.state().results.iter().cloned().collect()
    }

    pub fn events(&self) -> Vec<NotifierEvent> {
        self.state().events.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> NotificationsSnapshot {
        let state = self.state();
        NotificationsSnapshot {
            active: state.active.values().cloned().collect(),
            results: state.results.iter().cloned().collect(),
        }
    }
}

impl Notifier for MemoryNotifier {
    fn show_queue_status(&self, status: &QueueStatus) {
        info!(
            destination = %status.destination,
            "{} - Queued: {} in queue, ~{}s remaining",
            status.display_name,
            status.queue_position,
            status.estimated_wait_seconds
        );
        let mut state = self.state();
        state
            .active
            .insert(status.destination.clone(), status.clone());
        Self::record(&mut state, NotifierEvent::QueueStatus(status.clone()));
    }

    fn clear_queue_status(&self, destination: &str) {
        let mut state = self.state();
        if state.active.remove(destination).is_some() {
            tracing::debug!(destination, "Cleared queue status");
        }
        Self::record(
            &mut state,
            NotifierEvent::QueueCleared {
                destination: destination.to_string(),
            },
        );
    }

    fn show_delivery_result(&self, result: &DeliveryResult) {
        if result.success {
            info!(
                destination = %result.destination,
                attempts = result.attempts,
                "{} - Success: {}",
                result.display_name,
                result.detail
            );
        } else {
            warn!(
                destination = %result.destination,
                attempts = result.attempts,
                "{} - Failed: {}",
                result.display_name,
                result.detail
            );
        }
        let mut state = self.state();
        if self.result_history > 0 {
            if state.results.len() >= self.result_history {
                state.results.pop_front();
            }
            state.results.push_back(result.clone());
        }
        Self::record(&mut state, NotifierEvent::DeliveryResult(result.clone()));
    }
}
