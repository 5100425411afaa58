//! Delivery executor: one POST per attempt, bounded fixed-delay retries.
//!
//! Each destination hands its items to a [`DeliveryLane`], which issues first
//! attempts strictly in hand-off order. The executor gets owned copies of
//! everything it needs and never sees the destination table. Its outcome reaches the outside world only through the
//! [`Notifier`].
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info_span, warn};
use tracing_futures::Instrument;

use crate::dispatcher_error;
use crate::error::{RelayError, Result};
use crate::notifier::{DeliveryResult, Notifier};
use crate::settings::RetryPolicy;

/// Network seam of the executor
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// POST `payload` as JSON to `url`. `Ok` carries whatever status came back;
    /// `Err` is a transport failure.
    async fn post_json(&self, url: &str, payload: &Value) -> Result<StatusCode>;
}

#[derive(Clone, Debug)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpSender {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<StatusCode> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(serde_json::to_vec(payload)?)
            .send()
            .await
            .map_err(|err| RelayError::Transport(err.to_string()))?;
        Ok(response.status())
    }
}

/// Everything needed to deliver one dequeued item
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryJob {
    pub destination: String,
    pub payload: Value,
    pub display_name: String,
    pub retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } => *attempts,
            DeliveryOutcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Ordered hand-off of jobs for one destination
#[derive(Debug)]
pub struct DeliveryLane {
    job_tx: mpsc::UnboundedSender<DeliveryJob>,
}

impl DeliveryLane {
    pub fn send(&self, job: DeliveryJob) -> Result<()> {
        self.job_tx
            .send(job)
            .map_err(|_| dispatcher_error!("delivery lane for this destination has stopped"))
    }
}

#[derive(Clone)]
pub struct DeliveryExecutor {
    sender: Arc<dyn WebhookSender>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for DeliveryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryExecutor")
            .field("policy", &self.policy)
            .finish()
    }
}

impl DeliveryExecutor {
    pub fn new(
        sender: Arc<dyn WebhookSender>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sender,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start the ordered hand-off for one destination. Jobs sent to the lane
    /// get their first attempt in the order they were sent, one at a time.
    /// Retries continue on their own task. The lane drains what it was given
    /// and stops once the [`DeliveryLane`] is dropped.
    pub fn lane(&self, destination: &str) -> DeliveryLane {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<DeliveryJob>();
        let executor = self.clone();
        let span = info_span!("delivery_lane", destination = %destination);
        tokio::spawn(
            async move {
                while let Some(job) = job_rx.recv().await {
                    let first = executor.sender.post_json(&job.destination, &job.payload).await;
                    let span = info_span!(
                        "delivery",
                        destination = %job.destination,
                        name = %job.display_name
                    );
                    let executor = executor.clone();
                    tokio::spawn(async move { executor.resume(job, first).await }.instrument(span));
                }
                debug!("Delivery lane closed");
            }
            .instrument(span),
        );
        DeliveryLane { job_tx }
    }

    /// Attempt the job until it succeeds or its retry budget is spent.
    /// Retries are not rate limited.
    pub async fn deliver(&self, job: DeliveryJob) -> DeliveryOutcome {
        let first = self.sender.post_json(&job.destination, &job.payload).await;
        self.resume(job, first).await
    }

    /// Carry on from the outcome of the first attempt
    async fn resume(&self, job: DeliveryJob, first: Result<StatusCode>) -> DeliveryOutcome {
        let mut retries_remaining = job.retries;
        let mut attempts = 1u32;
        let mut outcome = first;
        loop {
            let failure = match outcome {
                Ok(status) if status.is_success() => {
                    debug!("Webhook sent with response status: {}", status);
                    let detail = format!("Data sent successfully to {}", job.display_name);
                    self.report(&job, true, detail, attempts);
                    return DeliveryOutcome::Delivered { attempts };
                }
                Ok(status) => RelayError::Status(status.as_u16()),
                Err(err) => err,
            };

            if retries_remaining == 0 {
                let detail = match &failure {
                    RelayError::Status(_) => {
                        format!("Failed to send data after {} attempts", attempts)
                    }
                    RelayError::Transport(msg) => format!("Network error: {}", msg),
                    other => format!("Network error: {}", other),
                };
                self.report(&job, false, detail.clone(), attempts);
                return DeliveryOutcome::Failed {
                    attempts,
                    reason: detail,
                };
            }

            let backoff = if failure.is_transport() {
                self.policy.transport_backoff
            } else {
                self.policy.status_backoff
            };
            warn!(
                "Webhook attempt {} failed ({}), retrying in {}ms ({} attempts left)",
                attempts,
                failure,
                backoff.as_millis(),
                retries_remaining
            );
            retries_remaining -= 1;
            tokio::time::sleep(backoff).await;
            attempts += 1;
            outcome = self.sender.post_json(&job.destination, &job.payload).await;
        }
    }

    fn report(&self, job: &DeliveryJob, success: bool, detail: String, attempts: u32) {
        self.notifier.show_delivery_result(&DeliveryResult {
            destination: job.destination.clone(),
            display_name: job.display_name.clone(),
            success,
            detail,
            attempts,
            finished_at: Utc::now(),
        });
    }
}
