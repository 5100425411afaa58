//! Rate-limited dispatcher.
//!
//! A single task owns the [`DestinationRegistry`] and is the only writer of
//! queues, send history, timers and status sessions. Producers reach it
//! through a cloneable [`DispatcherHandle`]; timers and status sessions reach
//! it by posting [`Wake`] messages. Each dispatch decision runs to completion
//! before the next message is read, so two decisions for one destination can
//! never overlap.
//!
//! Per destination the loop moves between `Idle` (no timer) and `Waiting`
//! (timer armed for the head of the queue). Sending is a hand-off to the
//! [`DeliveryExecutor`] and does not wait for the network.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info};

pub mod commands;
pub mod timer;

pub use commands::{DispatchCommand, Wake};

use crate::dispatcher_error;
use crate::error::Result;
use crate::executor::{DeliveryExecutor, DeliveryJob, WebhookSender};
use crate::notifier::session::NotificationSession;
use crate::notifier::{estimate_wait_seconds, Notifier, QueueStatus};
use crate::queue::QueueItem;
use crate::registry::{DestinationRegistry, DestinationSnapshot};
use crate::settings::{DeliverySettings, DestinationConfig, NotifierSettings, RelayConfig};
use timer::DispatchTimer;

const COMMAND_CHANNEL_SIZE: usize = 1000;

pub struct Dispatcher {
    registry: DestinationRegistry,
    /// url -> name and rate limit from the last applied configuration
    configured: HashMap<String, DestinationConfig>,
    /// Deleted from the configuration but not yet idle enough to forget
    retired: HashSet<String>,
    executor: DeliveryExecutor,
    notifier: Arc<dyn Notifier>,
    notifier_settings: NotifierSettings,
    wake_tx: mpsc::UnboundedSender<Wake>,
    next_id: u64,
}

impl Dispatcher {
    /// Build the loop, apply the startup configuration and spawn it.
    /// The loop ends once every handle has been dropped.
    pub fn spawn(
        settings: DeliverySettings,
        relay_config: RelayConfig,
        sender: Arc<dyn WebhookSender>,
        notifier: Arc<dyn Notifier>,
    ) -> DispatcherHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();

        let executor = DeliveryExecutor::new(sender, notifier.clone(), settings.retry);
        let mut dispatcher = Self {
            registry: DestinationRegistry::new(),
            configured: HashMap::new(),
            retired: HashSet::new(),
            executor,
            notifier,
            notifier_settings: settings.notifier,
            wake_tx,
            next_id: 0,
        };
        dispatcher.apply_config(relay_config);

        tokio::spawn(dispatcher.run(command_rx, wake_rx));
        DispatcherHandle { command_tx }
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<DispatchCommand>,
        mut wake_rx: mpsc::UnboundedReceiver<Wake>,
    ) {
        if self.registry.is_empty() {
            info!("Starting dispatcher loop with no configured destinations");
        } else {
            info!(
                "Starting dispatcher loop with {} configured destinations",
                self.registry.len()
            );
        }
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("Dispatcher command channel closed, exiting");
                        break;
                    }
                },
                // never closes: we hold a sender ourselves
                Some(wake) = wake_rx.recv() => self.handle_wake(wake),
            }
        }
        self.registry.cancel_all();
    }

    fn handle_command(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::Enqueue {
                destination,
                payload,
                display_name,
                rate_limit_seconds,
            } => {
                let (display_name, rate_limit_seconds) =
                    self.resolve(&destination, display_name, rate_limit_seconds);
                self.enqueue(&destination, payload, display_name, rate_limit_seconds);
            }
            DispatchCommand::Configure {
                destination,
                rate_limit_seconds,
            } => {
                self.registry.configure(&destination, rate_limit_seconds);
                debug!(
                    "Configured {} with a {}s rate limit",
                    destination, rate_limit_seconds
                );
            }
            DispatchCommand::ApplyConfig { config, resp_chan } => {
                self.apply_config(config);
                if resp_chan.send(()).is_err() {
                    debug!("ApplyConfig caller went away before the reply");
                }
            }
            DispatchCommand::GetDestination {
                destination,
                resp_chan,
            } => {
                let snapshot = self.registry.get(&destination).map(|d| d.snapshot());
                if resp_chan.send(snapshot).is_err() {
                    debug!("GetDestination caller went away before the reply");
                }
            }
            DispatchCommand::ListDestinations { resp_chan } => {
                if resp_chan.send(self.registry.snapshots()).is_err() {
                    debug!("ListDestinations caller went away before the reply");
                }
            }
        }
    }

    fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Dispatch {
                destination,
                timer_id,
            } => {
                let Some(entry) = self.registry.get_mut(&destination) else {
                    return;
                };
                if entry.timer.as_ref().map(|t| t.id) != Some(timer_id) {
                    debug!("Ignoring stale dispatch timer {} for {}", timer_id, destination);
                    return;
                }
                entry.timer = None;
                self.dispatch(&destination);
            }
            Wake::RefreshStatus {
                destination,
                session_id,
            } => {
                if self.session_id(&destination) == Some(session_id) {
                    self.refresh_status(&destination);
                }
            }
            Wake::ExpireSession {
                destination,
                session_id,
            } => {
                if self.session_id(&destination) == Some(session_id) {
                    debug!("Queue status session for {} expired", destination);
                    self.clear_session(&destination);
                }
            }
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Fill in what the producer left out from the cached configuration,
    /// then from the destination's current state.
    fn resolve(
        &self,
        destination: &str,
        display_name: Option<String>,
        rate_limit_seconds: Option<u64>,
    ) -> (String, u64) {
        let configured = self.configured.get(destination);
        let display_name = display_name
            .or_else(|| configured.map(|c| c.name.clone()))
            .unwrap_or_else(|| crate::settings::DEFAULT_DISPLAY_NAME.to_string());
        let rate_limit_seconds = rate_limit_seconds
            .or_else(|| configured.map(|c| c.rate_limit))
            .or_else(|| self.registry.get(destination).map(|d| d.rate_limit_seconds))
            .unwrap_or(0);
        (display_name, rate_limit_seconds)
    }

    fn enqueue(
        &mut self,
        key: &str,
        payload: Value,
        display_name: String,
        rate_limit_seconds: u64,
    ) {
        let now = Instant::now();
        let destination = self.registry.configure(key, rate_limit_seconds);
        destination
            .queue
            .push(QueueItem::new(payload, display_name.clone()));
        // decided before dispatch sees the queue
        let will_be_queued = destination.will_be_queued(now);
        debug!(
            "Enqueued item for {} ({} in queue, queued: {})",
            key,
            destination.queue.len(),
            will_be_queued
        );
        if will_be_queued {
            self.start_session(key, display_name);
        }
        self.dispatch(key);
    }

    /// One or more dispatch decisions for `key`. Unlimited destinations drain
    /// in a single pass; limited ones send at most one item and arm a timer.
    fn dispatch(&mut self, key: &str) {
        loop {
            let now = Instant::now();
            let Some(destination) = self.registry.get_mut(key) else {
                return;
            };
            if destination.queue.is_empty() {
                return;
            }
            if let Some(wait) = destination.remaining_wait(now) {
                self.arm_timer(key, wait);
                return;
            }

            let Some(item) = destination.queue.pop() else {
                return;
            };
            destination.mark_sent(now);
            // the decision this timer was waiting for has been made
            if let Some(timer) = destination.timer.take() {
                timer.cancel();
            }
            let rate_limited = destination.is_rate_limited();
            let interval = destination.rate_limit();
            let more_queued = !destination.queue.is_empty();

            debug!(
                "Handing item for {} to the executor ({} still queued)",
                key,
                if more_queued { "some" } else { "none" }
            );
            let executor = &self.executor;
            let lane = destination
                .lane
                .get_or_insert_with(|| executor.lane(key));
            let handed_off = lane.send(DeliveryJob {
                destination: key.to_string(),
                payload: item.payload,
                display_name: item.display_name,
                retries: executor.policy().retries,
            });
            if let Err(err) = handed_off {
                error!("Dropping item for {}: {}", key, err);
                destination.lane = None;
            }
            self.clear_session(key);

            if !more_queued {
                return;
            }
            if rate_limited {
                self.arm_timer(key, interval);
                return;
            }
        }
    }

    /// Replace whatever timer the destination had with one firing after `wait`
    fn arm_timer(&mut self, key: &str, wait: Duration) {
        let id = self.next_id();
        let wake_tx = self.wake_tx.clone();
        let Some(destination) = self.registry.get_mut(key) else {
            return;
        };
        if let Some(previous) = destination.timer.take() {
            previous.cancel();
        }
        debug!("Waiting {}ms before next send to {}", wait.as_millis(), key);
        destination.timer = Some(DispatchTimer::arm(id, key.to_string(), wait, wake_tx));
    }

    fn session_id(&self, key: &str) -> Option<u64> {
        self.registry
            .get(key)
            .and_then(|d| d.session.as_ref())
            .map(|s| s.id)
    }

    fn start_session(&mut self, key: &str, display_name: String) {
        self.clear_session(key);
        let id = self.next_id();
        let session = NotificationSession::start(
            id,
            key.to_string(),
            display_name,
            self.notifier_settings.interval,
            self.notifier_settings.session_lifetime,
            self.wake_tx.clone(),
        );
        if let Some(destination) = self.registry.get_mut(key) {
            destination.session = Some(session);
        }
        self.refresh_status(key);
    }

    fn refresh_status(&mut self, key: &str) {
        let now = Instant::now();
        let Some(destination) = self.registry.get(key) else {
            return;
        };
        let Some(session) = destination.session.as_ref() else {
            return;
        };
        if destination.queue.is_empty() || session.is_expired(now) {
            self.clear_session(key);
            return;
        }
        let queue_position = destination.queue.len();
        let status = QueueStatus {
            destination: key.to_string(),
            display_name: session.display_name.clone(),
            queue_position,
            estimated_wait_seconds: estimate_wait_seconds(
                destination.rate_limit(),
                destination.elapsed_since_sent(now),
                queue_position,
            ),
        };
        self.notifier.show_queue_status(&status);
    }

    /// No-op when no session is active
    fn clear_session(&mut self, key: &str) {
        let Some(destination) = self.registry.get_mut(key) else {
            return;
        };
        if let Some(session) = destination.session.take() {
            session.cancel();
            self.notifier.clear_queue_status(key);
        }
    }

    fn apply_config(&mut self, config: RelayConfig) {
        for webhook in &config.webhooks {
            self.registry.configure(&webhook.url, webhook.rate_limit);
        }
        let configured = config.by_url();
        let previous = std::mem::take(&mut self.configured);
        // only destinations whose configuration was deleted are candidates;
        // ones still busy stay candidates for later reconciliations
        self.retired
            .extend(previous.into_keys().filter(|key| !configured.contains_key(key)));
        self.retired.retain(|key| !configured.contains_key(key));
        let retired = &self.retired;
        let removed = self
            .registry
            .retain_idle(Instant::now(), |key| !retired.contains(key));
        for key in &removed {
            self.retired.remove(key);
        }
        if !removed.is_empty() {
            debug!("Dropped unconfigured idle destinations: {:?}", removed);
        }
        self.configured = configured;
        self.notifier_settings.interval = config.notification_interval();
        info!(
            "Applied configuration: {} webhooks, {}s status interval",
            config.webhooks.len(),
            config.settings.notification_interval
        );
    }
}

/// Cloneable entry point to the dispatcher loop
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    command_tx: mpsc::Sender<DispatchCommand>,
}

impl DispatcherHandle {
    async fn send(&self, command: DispatchCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| dispatcher_error!("dispatcher loop is not running"))
    }

    /// Queue `payload` for `destination`. Delivery outcomes are reported
    /// through the notifier, never here.
    pub async fn enqueue(
        &self,
        destination: impl Into<String>,
        payload: Value,
        display_name: impl Into<String>,
        rate_limit_seconds: u64,
    ) -> Result<()> {
        self.send(DispatchCommand::Enqueue {
            destination: destination.into(),
            payload,
            display_name: Some(display_name.into()),
            rate_limit_seconds: Some(rate_limit_seconds),
        })
        .await
    }

    /// Queue `payload` using the configured name and rate limit for `url`
    pub async fn submit(&self, url: impl Into<String>, payload: Value) -> Result<()> {
        self.enqueue_with(url, payload, None, None).await
    }

    pub async fn enqueue_with(
        &self,
        destination: impl Into<String>,
        payload: Value,
        display_name: Option<String>,
        rate_limit_seconds: Option<u64>,
    ) -> Result<()> {
        self.send(DispatchCommand::Enqueue {
            destination: destination.into(),
            payload,
            display_name,
            rate_limit_seconds,
        })
        .await
    }

    pub async fn configure(
        &self,
        destination: impl Into<String>,
        rate_limit_seconds: u64,
    ) -> Result<()> {
        self.send(DispatchCommand::Configure {
            destination: destination.into(),
            rate_limit_seconds,
        })
        .await
    }

    pub async fn apply_config(&self, config: RelayConfig) -> Result<()> {
        let (resp_chan, resp_rx) = oneshot::channel();
        self.send(DispatchCommand::ApplyConfig { config, resp_chan })
            .await?;
        resp_rx
            .await
            .map_err(|_| dispatcher_error!("dispatcher dropped the reply"))
    }

    pub async fn destination(&self, destination: impl Into<String>) -> Result<Option<DestinationSnapshot>> {
        let (resp_chan, resp_rx) = oneshot::channel();
        self.send(DispatchCommand::GetDestination {
            destination: destination.into(),
            resp_chan,
        })
        .await?;
        resp_rx
            .await
            .map_err(|_| dispatcher_error!("dispatcher dropped the reply"))
    }

    pub async fn destinations(&self) -> Result<Vec<DestinationSnapshot>> {
        let (resp_chan, resp_rx) = oneshot::channel();
        self.send(DispatchCommand::ListDestinations { resp_chan })
            .await?;
        resp_rx
            .await
            .map_err(|_| dispatcher_error!("dispatcher dropped the reply"))
    }
}
