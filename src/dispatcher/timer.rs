//! The single pending wake-up a destination may have
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::commands::Wake;

#[derive(Debug)]
pub struct DispatchTimer {
    pub id: u64,
    handle: AbortHandle,
}

impl DispatchTimer {
    /// Post `Wake::Dispatch` for `destination` once `wait` has elapsed
    pub fn arm(
        id: u64,
        destination: String,
        wait: Duration,
        wake_tx: mpsc::UnboundedSender<Wake>,
    ) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // loop already gone on send failure
            let _ = wake_tx.send(Wake::Dispatch {
                destination,
                timer_id: id,
            });
        });
        Self {
            id,
            handle: task.abort_handle(),
        }
    }

    pub fn cancel(self) {
        drop(self)
    }
}

impl Drop for DispatchTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
