//! Destination registry: the one owned table of per-destination state.
//!
//! Everything the dispatcher needs to know about a destination lives in its
//! [`Destination`] entry: rate limit, send history, pending queue, the armed
//! dispatch timer and the active status session. The table is owned by the
//! dispatcher loop and never shared.
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::dispatcher::timer::DispatchTimer;
use crate::executor::DeliveryLane;
use crate::notifier::session::NotificationSession;
use crate::queue::DestinationQueue;

/// Observable dispatcher state of one destination.
/// Sending is instantaneous from the dispatcher's side so it never shows up here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchState {
    Idle,
    Waiting,
}

#[derive(Debug)]
pub struct Destination {
    pub key: String,
    pub rate_limit_seconds: u64,
    /// Monotonic time of the last hand-off to the executor; `None` if never sent
    pub last_sent_at: Option<Instant>,
    pub last_sent_wall: Option<DateTime<Utc>>,
    pub queue: DestinationQueue,
    pub(crate) timer: Option<DispatchTimer>,
    pub(crate) session: Option<NotificationSession>,
    /// Started on the first send
    pub(crate) lane: Option<DeliveryLane>,
}

impl Destination {
    pub fn new(key: impl Into<String>, rate_limit_seconds: u64) -> Self {
        Self {
            key: key.into(),
            rate_limit_seconds,
            last_sent_at: None,
            last_sent_wall: None,
            queue: DestinationQueue::new(),
            timer: None,
            session: None,
            lane: None,
        }
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs(self.rate_limit_seconds)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit_seconds > 0
    }

    /// `None` means never sent, which is always far enough in the past
    pub fn elapsed_since_sent(&self, now: Instant) -> Option<Duration> {
        self.last_sent_at
            .map(|sent| now.saturating_duration_since(sent))
    }

    /// Time left before the head of the queue may be sent, if any
    pub fn remaining_wait(&self, now: Instant) -> Option<Duration> {
        if !self.is_rate_limited() {
            return None;
        }
        let elapsed = self.elapsed_since_sent(now)?;
        let limit = self.rate_limit();
        if elapsed < limit {
            Some(limit - elapsed)
        } else {
            None
        }
    }

    /// Whether the most recently appended item has to wait its turn.
    /// Must be asked after the append and before dispatching.
    pub fn will_be_queued(&self, now: Instant) -> bool {
        self.is_rate_limited() && (self.queue.len() > 1 || self.remaining_wait(now).is_some())
    }

    pub(crate) fn mark_sent(&mut self, now: Instant) {
        // never move backwards
        if self.last_sent_at.map_or(true, |previous| previous <= now) {
            self.last_sent_at = Some(now);
            self.last_sent_wall = Some(Utc::now());
        }
    }

    pub fn state(&self) -> DispatchState {
        if self.timer.is_some() {
            DispatchState::Waiting
        } else {
            DispatchState::Idle
        }
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Nothing queued, nothing armed, nothing displayed, and no rate-limit
    /// interval still running. Forgetting a destination forgets its send
    /// history, so it has to be safe to start over from "never sent".
    pub fn is_idle(&self, now: Instant) -> bool {
        self.queue.is_empty()
            && self.timer.is_none()
            && self.session.is_none()
            && self.remaining_wait(now).is_none()
    }

    pub fn snapshot(&self) -> DestinationSnapshot {
        DestinationSnapshot {
            url: self.key.clone(),
            rate_limit_seconds: self.rate_limit_seconds,
            queue_length: self.queue.len(),
            last_sent_at: self.last_sent_wall,
            state: self.state(),
            status_session_active: self.has_session(),
        }
    }
}

/// Read-only view of a destination handed out of the dispatcher loop
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DestinationSnapshot {
    pub url: String,
    pub rate_limit_seconds: u64,
    pub queue_length: usize,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub state: DispatchState,
    pub status_session_active: bool,
}

#[derive(Debug, Default)]
pub struct DestinationRegistry {
    destinations: HashMap<String, Destination>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the destination if absent, otherwise update its rate limit in
    /// place. Send history, queue, timer and session are left untouched.
    pub fn configure(&mut self, key: &str, rate_limit_seconds: u64) -> &mut Destination {
        let destination = self
            .destinations
            .entry(key.to_string())
            .or_insert_with(|| Destination::new(key, rate_limit_seconds));
        destination.rate_limit_seconds = rate_limit_seconds;
        destination
    }

    pub fn get(&self, key: &str) -> Option<&Destination> {
        self.destinations.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Destination> {
        self.destinations.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Drop idle destinations that `keep` rejects. Busy ones always stay.
    /// Returns the removed keys.
    pub fn retain_idle<F>(&mut self, now: Instant, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut removed = Vec::new();
        self.destinations.retain(|key, destination| {
            if keep(key) || !destination.is_idle(now) {
                true
            } else {
                removed.push(key.clone());
                false
            }
        });
        removed
    }

    /// Snapshots sorted by url
    pub fn snapshots(&self) -> Vec<DestinationSnapshot> {
        let mut snapshots: Vec<DestinationSnapshot> =
            self.destinations.values().map(Destination::snapshot).collect();
        snapshots.sort_by(|a, b| a.url.cmp(&b.url));
        snapshots
    }

    /// Cancel every timer and session, keeping the queues
    pub fn cancel_all(&mut self) {
        for destination in self.destinations.values_mut() {
            if let Some(timer) = destination.timer.take() {
                timer.cancel();
            }
            if let Some(session) = destination.session.take() {
                session.cancel();
            }
        }
    }
}
