//! Per-destination FIFO of pending deliveries
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One pending delivery, owned by its destination's queue until dispatched
#[derive(Clone, Debug, PartialEq)]
pub struct QueueItem {
    pub payload: Value,
    pub display_name: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(payload: Value, display_name: impl Into<String>) -> Self {
        Self {
            payload,
            display_name: display_name.into(),
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DestinationQueue {
    items: VecDeque<QueueItem>,
}

impl DestinationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: QueueItem) {
        self.items.push_back(item);
    }

    /// Items leave the queue exactly once, here
    pub fn pop(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
