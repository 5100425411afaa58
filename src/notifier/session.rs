//! Recurring queue status display for one destination
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::dispatcher::commands::Wake;

#[derive(Debug)]
pub struct NotificationSession {
    pub id: u64,
    pub display_name: String,
    pub expires_at: Instant,
    handle: AbortHandle,
}

impl NotificationSession {
    /// Start the refresh ticker. The first display is the caller's job; the
    /// ticker posts `RefreshStatus` every `interval` and a final
    /// `ExpireSession` once `lifetime` has passed.
    pub fn start(
        id: u64,
        destination: String,
        display_name: String,
        interval: Duration,
        lifetime: Duration,
        wake_tx: mpsc::UnboundedSender<Wake>,
    ) -> Self {
        let expires_at = Instant::now() + lifetime;
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let expiry = time::sleep_until(expires_at);
            tokio::pin!(expiry);
            loop {
                tokio::select! {
                    // expiry wins a tie with the last tick
                    biased;
                    _ = &mut expiry => {
                        let _ = wake_tx.send(Wake::ExpireSession {
                            destination: destination.clone(),
                            session_id: id,
                        });
                        break;
                    }
                    _ = ticker.tick() => {
                        let sent = wake_tx.send(Wake::RefreshStatus {
                            destination: destination.clone(),
                            session_id: id,
                        });
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            id,
            display_name,
            expires_at,
            handle: task.abort_handle(),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn cancel(self) {
        drop(self)
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
