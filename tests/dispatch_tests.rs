//! Dispatcher behavior under tokio's paused clock.
//! A recording sender stands in for the network so every send is timestamped
//! on the virtual clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

use hookrelay::dispatcher::{Dispatcher, DispatcherHandle};
use hookrelay::error::Result;
use hookrelay::executor::WebhookSender;
use hookrelay::notifier::{MemoryNotifier, NotifierEvent};
use hookrelay::registry::DispatchState;
use hookrelay::settings::{DeliverySettings, DestinationConfig, RelayConfig};

const URL: &str = "https://x/test";

#[derive(Clone, Debug)]
struct Call {
    at: Instant,
    url: String,
    payload: Value,
}

struct RecordingSender {
    status: StatusCode,
    calls: Mutex<Vec<Call>>,
}

impl RecordingSender {
    fn new(status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, payload: &Value) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| &call.payload == payload)
            .collect()
    }
}

#[async_trait]
impl WebhookSender for RecordingSender {
    async fn post_json(&self, url: &str, payload: &Value) -> Result<StatusCode> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            url: url.to_string(),
            payload: payload.clone(),
        });
        Ok(self.status)
    }
}

fn start(sender: Arc<RecordingSender>) -> (DispatcherHandle, Arc<MemoryNotifier>) {
    start_with(sender, RelayConfig::default())
}

fn start_with(
    sender: Arc<RecordingSender>,
    config: RelayConfig,
) -> (DispatcherHandle, Arc<MemoryNotifier>) {
    let notifier = Arc::new(MemoryNotifier::default());
    let handle = Dispatcher::spawn(
        DeliverySettings::default(),
        config,
        sender,
        notifier.clone(),
    );
    (handle, notifier)
}

/// Round-trip through the loop twice so every earlier command and the
/// delivery tasks it spawned have run.
async fn settle(handle: &DispatcherHandle) {
    handle.destinations().await.unwrap();
    handle.destinations().await.unwrap();
}

fn assert_near(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(10),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

fn status_events(notifier: &MemoryNotifier) -> Vec<(usize, u64)> {
    notifier
        .events()
        .into_iter()
        .filter_map(|event| match event {
            NotifierEvent::QueueStatus(status) => {
                Some((status.queue_position, status.estimated_wait_seconds))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlimited_destination_keeps_order_across_workers() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, _notifier) = start(sender.clone());

    for n in 0..50 {
        handle.enqueue(URL, json!(n), "Test", 0).await.unwrap();
    }
    for _ in 0..200 {
        if sender.calls().len() == 50 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let order: Vec<Value> = sender.calls().into_iter().map(|c| c.payload).collect();
    let expected: Vec<Value> = (0..50).map(|n| json!(n)).collect();
    assert_eq!(order, expected);
}

#[tokio::test(start_paused = true)]
async fn test_items_arrive_in_enqueue_order() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, _notifier) = start(sender.clone());

    for n in 0..5 {
        handle.enqueue(URL, json!({ "n": n }), "Test", 1).await.unwrap();
    }
    sleep(Duration::from_secs(10)).await;

    let calls = sender.calls();
    let order: Vec<Value> = calls.iter().map(|c| c.payload["n"].clone()).collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
    assert!(calls.iter().all(|c| c.url == URL));
    for pair in calls.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_secs(1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_back_to_back_items_respect_rate_limit() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, _notifier) = start(sender.clone());

    handle.enqueue(URL, json!("a"), "Test", 3).await.unwrap();
    handle.enqueue(URL, json!("b"), "Test", 3).await.unwrap();
    settle(&handle).await;
    assert_eq!(sender.calls().len(), 1);

    sleep(Duration::from_secs(5)).await;
    let calls = sender.calls();
    assert_eq!(calls.len(), 2);
    assert_near(calls[1].at - calls[0].at, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_unlimited_destination_drains_at_once() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, notifier) = start(sender.clone());
    let started = Instant::now();

    for n in 0..5 {
        handle.enqueue(URL, json!({ "n": n }), "Test", 0).await.unwrap();
    }
    settle(&handle).await;

    let calls = sender.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls.iter().all(|c| c.at == started));
    assert!(status_events(&notifier).is_empty());

    let snapshot = handle.destination(URL).await.unwrap().unwrap();
    assert_eq!(snapshot.queue_length, 0);
    assert_eq!(snapshot.state, DispatchState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_second_item_waits_for_remaining_interval() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, notifier) = start(sender.clone());
    let started = Instant::now();

    handle.enqueue(URL, json!("A"), "Test", 10).await.unwrap();
    settle(&handle).await;
    // A goes out immediately and no session starts for it
    assert_eq!(sender.calls().len(), 1);
    assert!(notifier.active_status(URL).is_none());

    sleep(Duration::from_secs(2)).await;
    handle.enqueue(URL, json!("B"), "Test", 10).await.unwrap();
    settle(&handle).await;

    let status = notifier.active_status(URL).unwrap();
    assert_eq!(status.queue_position, 1);
    assert_eq!(status.estimated_wait_seconds, 8);
    assert_eq!(status.display_name, "Test");

    let snapshot = handle.destination(URL).await.unwrap().unwrap();
    assert_eq!(snapshot.state, DispatchState::Waiting);
    assert_eq!(snapshot.queue_length, 1);
    assert!(snapshot.status_session_active);

    sleep(Duration::from_secs(9)).await;
    let calls = sender.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].payload, json!("B"));
    assert_near(calls[1].at - started, Duration::from_secs(10));

    // sending B ended its session
    assert!(notifier.active_status(URL).is_none());
    assert!(notifier
        .events()
        .iter()
        .any(|e| matches!(e, NotifierEvent::QueueCleared { destination } if destination == URL)));
    let snapshot = handle.destination(URL).await.unwrap().unwrap();
    assert_eq!(snapshot.state, DispatchState::Idle);
    assert!(!snapshot.status_session_active);
}

#[tokio::test(start_paused = true)]
async fn test_queue_of_two_or_more_starts_session() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, notifier) = start(sender.clone());

    for n in 0..3 {
        handle.enqueue(URL, json!({ "n": n }), "Test", 5).await.unwrap();
    }
    settle(&handle).await;

    // first sent, the other two wait: 5s for the head plus 5s behind it
    let status = notifier.active_status(URL).unwrap();
    assert_eq!(status.queue_position, 2);
    assert_eq!(status.estimated_wait_seconds, 10);
}

#[tokio::test(start_paused = true)]
async fn test_single_sendable_item_starts_no_session() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, notifier) = start(sender.clone());

    handle.enqueue(URL, json!("only"), "Test", 10).await.unwrap();
    settle(&handle).await;

    assert_eq!(sender.calls().len(), 1);
    assert!(status_events(&notifier).is_empty());
    assert!(!notifier
        .events()
        .iter()
        .any(|e| matches!(e, NotifierEvent::QueueCleared { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_failing_destination_gets_four_attempts_then_queue_advances() {
    let sender = RecordingSender::new(StatusCode::INTERNAL_SERVER_ERROR);
    let (handle, notifier) = start(sender.clone());
    let started = Instant::now();

    handle.enqueue(URL, json!("first"), "Test", 5).await.unwrap();
    handle.enqueue(URL, json!("second"), "Test", 5).await.unwrap();
    sleep(Duration::from_secs(4)).await;

    let first = sender.calls_for(&json!("first"));
    assert_eq!(first.len(), 4);
    for (n, call) in first.iter().enumerate() {
        assert_near(call.at - started, Duration::from_secs(n as u64));
    }
    let results = notifier.results();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].attempts, 4);

    sleep(Duration::from_secs(5)).await;
    let second = sender.calls_for(&json!("second"));
    assert!(!second.is_empty());
    assert_near(second[0].at - started, Duration::from_secs(5));
    // the failed item is never retried or requeued
    assert_eq!(sender.calls_for(&json!("first")).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_status_session_refreshes_then_expires() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, notifier) = start(sender.clone());

    handle.enqueue(URL, json!(1), "Slow", 100).await.unwrap();
    handle.enqueue(URL, json!(2), "Slow", 100).await.unwrap();
    settle(&handle).await;

    sleep(Duration::from_secs(12)).await;
    assert_eq!(status_events(&notifier), vec![(1, 100), (1, 95), (1, 90)]);

    sleep(Duration::from_secs(50)).await;
    assert!(notifier.active_status(URL).is_none());
    let snapshot = handle.destination(URL).await.unwrap().unwrap();
    assert!(!snapshot.status_session_active);
    // expiry does not touch the queue or the timer
    assert_eq!(snapshot.queue_length, 1);
    assert_eq!(snapshot.state, DispatchState::Waiting);

    // one refresh every 5s until the 60s lifetime runs out, then nothing
    let refreshes = status_events(&notifier).len();
    assert!((12..=13).contains(&refreshes), "got {} refreshes", refreshes);
    sleep(Duration::from_secs(20)).await;
    assert_eq!(status_events(&notifier).len(), refreshes);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_change_waits_for_next_decision() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, _notifier) = start(sender.clone());
    let started = Instant::now();

    handle.enqueue(URL, json!("A"), "Test", 10).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    handle.enqueue(URL, json!("B"), "Test", 10).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    // lowering the limit does not shorten the armed timer
    handle.configure(URL, 0).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(sender.calls().len(), 1);
    assert_eq!(handle.destination(URL).await.unwrap().unwrap().rate_limit_seconds, 0);

    // the next enqueue re-runs the decision with its own limit
    handle.enqueue(URL, json!("C"), "Test", 2).await.unwrap();
    sleep(Duration::from_secs(3)).await;

    let calls = sender.calls();
    let order: Vec<Value> = calls.iter().map(|c| c.payload.clone()).collect();
    assert_eq!(order, vec![json!("A"), json!("B"), json!("C")]);
    assert_near(calls[1].at - started, Duration::from_secs(5));
    assert_near(calls[2].at - started, Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_destinations_are_independent() {
    let sender = RecordingSender::new(StatusCode::OK);
    let (handle, _notifier) = start(sender.clone());

    handle.enqueue("https://x/slow", json!(1), "Slow", 60).await.unwrap();
    handle.enqueue("https://x/slow", json!(2), "Slow", 60).await.unwrap();
    handle.enqueue("https://x/fast", json!(3), "Fast", 0).await.unwrap();
    settle(&handle).await;

    // no ordering across destinations, only one send each so far
    let mut urls: Vec<String> = sender.calls().into_iter().map(|c| c.url).collect();
    urls.sort();
    assert_eq!(urls, vec!["https://x/fast", "https://x/slow"]);
    let destinations = handle.destinations().await.unwrap();
    assert_eq!(destinations.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_submit_uses_configured_name_and_rate_limit() {
    let sender = RecordingSender::new(StatusCode::OK);
    let config = RelayConfig {
        webhooks: vec![DestinationConfig {
            url: URL.to_string(),
            name: "Reading list".to_string(),
            rate_limit: 10,
        }],
        ..Default::default()
    };
    let (handle, notifier) = start_with(sender.clone(), config);

    let snapshot = handle.destination(URL).await.unwrap().unwrap();
    assert_eq!(snapshot.rate_limit_seconds, 10);
    assert_eq!(snapshot.last_sent_at, None);

    handle.submit(URL, json!("one")).await.unwrap();
    handle.submit(URL, json!("two")).await.unwrap();
    settle(&handle).await;

    assert_eq!(sender.calls().len(), 1);
    assert_eq!(notifier.results()[0].display_name, "Reading list");
    assert_eq!(notifier.active_status(URL).unwrap().display_name, "Reading list");

    handle
        .submit("https://x/unknown", json!("three"))
        .await
        .unwrap();
    settle(&handle).await;
    let unknown = notifier
        .results()
        .into_iter()
        .find(|r| r.destination == "https://x/unknown")
        .unwrap();
    assert_eq!(unknown.display_name, "Webhook");
}

#[tokio::test(start_paused = true)]
async fn test_apply_config_reconciles_destinations() {
    let sender = RecordingSender::new(StatusCode::OK);
    let webhook = |url: &str, rate_limit: u64| DestinationConfig {
        url: url.to_string(),
        name: "Test".to_string(),
        rate_limit,
    };
    let config = RelayConfig {
        webhooks: vec![webhook("https://x/idle", 5), webhook("https://x/busy", 30)],
        ..Default::default()
    };
    let (handle, _notifier) = start_with(sender.clone(), config);

    handle.submit("https://x/busy", json!(1)).await.unwrap();
    handle.submit("https://x/busy", json!(2)).await.unwrap();
    handle.enqueue("https://x/adhoc", json!(3), "Adhoc", 0).await.unwrap();
    settle(&handle).await;

    // both configured webhooks deleted, the ad hoc one never configured
    handle
        .apply_config(RelayConfig {
            webhooks: vec![webhook("https://x/new", 1)],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(handle.destination("https://x/idle").await.unwrap().is_none());
    let busy = handle.destination("https://x/busy").await.unwrap().unwrap();
    assert_eq!(busy.queue_length, 1);
    assert!(handle.destination("https://x/adhoc").await.unwrap().is_some());
    assert_eq!(
        handle.destination("https://x/new").await.unwrap().unwrap().rate_limit_seconds,
        1
    );

    // the busy destination still delivers what it holds
    sleep(Duration::from_secs(31)).await;
    assert_eq!(sender.calls_for(&json!(2)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconfigured_destination_keeps_its_interval() {
    let sender = RecordingSender::new(StatusCode::OK);
    let config = RelayConfig {
        webhooks: vec![DestinationConfig {
            url: URL.to_string(),
            name: "Test".to_string(),
            rate_limit: 10,
        }],
        ..Default::default()
    };
    let (handle, _notifier) = start_with(sender.clone(), config.clone());
    let started = Instant::now();

    handle.submit(URL, json!("a")).await.unwrap();
    settle(&handle).await;
    sleep(Duration::from_secs(1)).await;

    // removed and added back while the interval is still running
    handle.apply_config(RelayConfig::default()).await.unwrap();
    assert!(handle.destination(URL).await.unwrap().is_some());
    handle.apply_config(config).await.unwrap();
    handle.submit(URL, json!("b")).await.unwrap();
    settle(&handle).await;
    assert_eq!(sender.calls().len(), 1);

    sleep(Duration::from_secs(10)).await;
    let calls = sender.calls();
    assert_eq!(calls.len(), 2);
    assert_near(calls[1].at - started, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_destination_is_forgotten_once_its_interval_ends() {
    let sender = RecordingSender::new(StatusCode::OK);
    let config = RelayConfig {
        webhooks: vec![DestinationConfig {
            url: URL.to_string(),
            name: "Test".to_string(),
            rate_limit: 10,
        }],
        ..Default::default()
    };
    let (handle, _notifier) = start_with(sender.clone(), config);

    handle.submit(URL, json!("a")).await.unwrap();
    settle(&handle).await;

    handle.apply_config(RelayConfig::default()).await.unwrap();
    assert!(handle.destination(URL).await.unwrap().is_some());

    // a later reconciliation still remembers it was deleted
    sleep(Duration::from_secs(11)).await;
    handle.apply_config(RelayConfig::default()).await.unwrap();
    assert!(handle.destination(URL).await.unwrap().is_none());
}
