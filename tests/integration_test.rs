//! Integration Tests - Feed Client and Ingest Pipeline End to End
//!
//! Drives the feed client against scripted in-memory connections and
//! checks what reaches the sample channel, the status channel and the
//! cursor store. Uses mockall for the key/value store and tokio::test
//! for async tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockall::mock;
use mockall::predicate::*;
use serde_json::json;
use tokio::sync::{broadcast, watch};

use tickstream::adapters::persistence::MemoryStore;
use tickstream::config::AppConfig;
use tickstream::domain::feed_state::{FeedStatus, Stage};
use tickstream::domain::sample::{FrameKind, Payload, RawMessage, Sample};
use tickstream::ports::cursor_store::KeyValueStore;
use tickstream::ports::feed_transport::{FeedConnection, FeedConnector};
use tickstream::usecases::{FeedClient, IngestPipeline};

const CURSOR_KEY: &str = "test.cursor";

// ---- Mock Definitions ----

mock! {
    pub Kv {}

    #[async_trait::async_trait]
    impl KeyValueStore for Kv {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
        async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    }
}

// ---- Scripted transport ----

enum Step {
    Msg(RawMessage),
    /// Server closes the connection.
    Close,
    /// Connection stays open with nothing to say.
    Hold,
}

#[derive(Default)]
struct ScriptedConnector {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedConnector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> anyhow::Result<Box<dyn FeedConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("connection refused"))?;
        Ok(Box::new(ScriptedConnection {
            steps: script.into(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedConnection {
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl FeedConnection for ScriptedConnection {
    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn next_message(&mut self) -> Option<anyhow::Result<RawMessage>> {
        match self.steps.pop_front() {
            Some(Step::Msg(raw)) => Some(Ok(raw)),
            Some(Step::Close) | None => None,
            Some(Step::Hold) => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.steps.clear();
    }
}

// ---- Helpers ----

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.feed.cursor_key = CURSOR_KEY.to_string();
    config.feed.status_throttle_ms = 10;
    config.reconnect.initial_delay_ms = 20;
    config.reconnect.max_delay_ms = 80;
    config.ingest.frame_interval_ms = 2;
    config
}

fn control(value: serde_json::Value) -> Step {
    Step::Msg(RawMessage::Text(value.to_string()))
}

fn frame(kind: &str, seqs: &[u64]) -> Step {
    let samples: Vec<_> = seqs
        .iter()
        .map(|seq| {
            json!({
                "seq": seq,
                "id": "BTC",
                "series_seq": seq,
                "t_ms": 1_700_000_000_000_i64 + *seq as i64,
                "payload": {"type": "scalar", "value": *seq as f64}
            })
        })
        .collect();
    control(json!({"type": kind, "samples": samples}))
}

fn seqs(batch: &[Sample]) -> Vec<u64> {
    batch.iter().map(|s| s.seq).collect()
}

async fn wait_for_status(
    rx: &mut watch::Receiver<FeedStatus>,
    pred: impl Fn(&FeedStatus) -> bool,
) -> FeedStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let status = rx.borrow_and_update();
                if pred(&status) {
                    return status.clone();
                }
            }
            rx.changed().await.expect("status channel closed");
        }
    })
    .await
    .expect("timed out waiting for status")
}

// ---- Tests ----

#[tokio::test]
async fn test_history_to_live_handoff_dedups_overlap() {
    let connector = ScriptedConnector::new(vec![vec![
        control(json!({"type": "init_begin", "min_seq": 1, "wm_seq": 5})),
        frame("history", &[1, 2, 3, 4, 5]),
        control(json!({"type": "init_complete", "resume_from": 5, "resume_truncated": false})),
        frame("live", &[5, 6]),
        Step::Hold,
    ]]);
    let store = Arc::new(MemoryStore::new());
    let (client, handle, mut out) = FeedClient::new(&test_config(), connector.clone(), store.clone())
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    let first = out.samples.recv().await.unwrap();
    assert_eq!(seqs(&first), vec![1, 2, 3, 4, 5]);
    let second = out.samples.recv().await.unwrap();
    assert_eq!(seqs(&second), vec![6]);

    let status = wait_for_status(&mut out.status, |s| s.stage == Stage::Live && s.last_seq == 6).await;
    assert_eq!(status.history.expected, 5);
    assert_eq!(status.history.received, 5);
    assert_eq!(status.gaps.global, 0);
    assert_eq!(status.gaps.duplicates, 1);
    assert_eq!(status.resume.server, Some(5));

    assert_eq!(connector.sent(), vec![r#"{"type":"resume","from_seq":1}"#.to_string()]);
    assert_eq!(store.get(CURSOR_KEY).await.unwrap().as_deref(), Some("6"));

    handle.close().await;
    wait_for_status(&mut out.status, |s| s.stage == Stage::Closed).await;
    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_resumes_from_persisted_cursor() {
    let connector = ScriptedConnector::new(vec![vec![
        control(json!({"type": "init_begin", "min_seq": 1, "wm_seq": 44})),
        frame("history", &[40, 41, 42, 43, 44]),
        Step::Hold,
    ]]);
    let store = Arc::new(MemoryStore::with_entry(CURSOR_KEY, "41"));
    let (client, _handle, mut out) = FeedClient::new(&test_config(), connector.clone(), store.clone())
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    let batch = out.samples.recv().await.unwrap();
    assert_eq!(seqs(&batch), vec![42, 43, 44]);

    let status = wait_for_status(&mut out.status, |s| s.stage == Stage::History && s.last_seq == 44).await;
    assert_eq!(status.history.expected, 3);
    assert_eq!(connector.sent(), vec![r#"{"type":"resume","from_seq":42}"#.to_string()]);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_binary_frames_and_gap_accounting() {
    let sample = |seq: u64, id: &str, series_seq: u64| Sample {
        seq,
        series_id: id.to_string(),
        series_seq: Some(series_seq),
        t_ms: seq as i64,
        payload: Payload::Tick {
            price: 100.0 + seq as f64,
            volume: 1.0,
        },
    };
    let live = tickstream::domain::codec::encode_binary_frame(
        FrameKind::Live,
        &[sample(1, "A", 1), sample(2, "A", 2), sample(5, "A", 4), sample(6, "B", 1)],
    );
    let connector = ScriptedConnector::new(vec![vec![
        Step::Msg(RawMessage::Binary(live)),
        Step::Msg(RawMessage::Binary(vec![9, 0, 0])),
        Step::Hold,
    ]]);
    let (client, _handle, mut out) = FeedClient::new(&test_config(), connector, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    let batch = out.samples.recv().await.unwrap();
    assert_eq!(seqs(&batch), vec![1, 2, 5, 6]);

    let status = wait_for_status(&mut out.status, |s| s.decode.binary_errors == 1).await;
    assert_eq!(status.stage, Stage::Live);
    assert_eq!(status.gaps.global, 1);
    assert_eq!(status.gaps.global_missing, 2);
    assert_eq!(status.gaps.series, 1);
    assert_eq!(status.gaps.series_missing, 1);
    assert_eq!(status.series, 2);

    let rows = out.registry.borrow().clone();
    let a = rows.iter().find(|r| r.id == "A").unwrap();
    assert_eq!(a.count, 3);
    assert_eq!(a.missed, 1);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnect_backoff_grows_and_caps() {
    // Every connect is refused.
    let connector = ScriptedConnector::new(vec![]);
    let (client, _handle, mut out) = FeedClient::new(&test_config(), connector.clone(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    // Snapshots may be coalesced; every one observed must follow the schedule.
    let mut seen = BTreeMap::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = out.status.borrow_and_update().clone();
            if let Some(delay) = status.reconnect.next_delay_ms {
                assert_ne!(status.stage, Stage::Live);
                seen.insert(status.reconnect.attempts, delay);
            }
            if status.reconnect.attempts >= 5 {
                break;
            }
            out.status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    for (attempt, delay) in &seen {
        assert_eq!(*delay, (20u64 << (attempt - 1)).min(80), "attempt {attempt}");
    }
    assert!(connector.connects() >= 5);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let mut config = test_config();
    config.reconnect.initial_delay_ms = 200;
    let connector = ScriptedConnector::new(vec![vec![Step::Close], vec![Step::Hold]]);
    let (client, handle, mut out) = FeedClient::new(&config, connector.clone(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    wait_for_status(&mut out.status, |s| s.reconnect.attempts == 1).await;
    handle.close().await;
    handle.close().await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(connector.connects(), 1);
    assert_eq!(out.status.borrow().stage, Stage::Closed);

    // An explicit connect brings it back.
    handle.connect().await;
    wait_for_status(&mut out.status, |s| s.stage == Stage::Connecting).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while connector.connects() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

/// Connector whose connect attempts never resolve.
#[derive(Default)]
struct StalledConnector {
    connects: AtomicUsize,
}

#[async_trait::async_trait]
impl FeedConnector for StalledConnector {
    async fn connect(&self, _url: &str) -> anyhow::Result<Box<dyn FeedConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_close_abandons_in_flight_connect() {
    let connector = Arc::new(StalledConnector::default());
    let (client, handle, mut out) = FeedClient::new(&test_config(), connector.clone(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    wait_for_status(&mut out.status, |s| s.stage == Stage::Connecting).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Non-terminal commands are applied without abandoning the attempt.
    handle.set_auto_reconnect(false).await;
    wait_for_status(&mut out.status, |s| !s.reconnect.enabled).await;
    assert_eq!(out.status.borrow().stage, Stage::Connecting);

    handle.close().await;
    wait_for_status(&mut out.status, |s| s.stage == Stage::Closed).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(out.status.borrow().stage, Stage::Closed);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disabled_auto_reconnect_stays_down() {
    let mut config = test_config();
    config.reconnect.enabled = false;
    let connector = ScriptedConnector::new(vec![vec![frame("live", &[1]), Step::Close]]);
    let (client, _handle, mut out) = FeedClient::new(&config, connector.clone(), Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    let status = wait_for_status(&mut out.status, |s| s.stage == Stage::Closed).await;
    assert_eq!(status.last_seq, 1);
    assert_eq!(status.reconnect.next_delay_ms, None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.connects(), 1);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reset_cursor_persists_zero_and_resumes_from_start() {
    let connector = ScriptedConnector::new(vec![
        vec![frame("live", &[7, 8]), Step::Hold],
        vec![Step::Hold],
    ]);
    let store = Arc::new(MemoryStore::new());
    let (client, handle, mut out) = FeedClient::new(&test_config(), connector.clone(), store.clone())
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    assert_eq!(seqs(&out.samples.recv().await.unwrap()), vec![7, 8]);
    assert_eq!(store.get(CURSOR_KEY).await.unwrap().as_deref(), Some("8"));

    handle.reset_cursor(true).await;
    handle.reconnect().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while connector.sent().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(connector.sent()[1], r#"{"type":"resume","from_seq":1}"#);
    assert_eq!(store.get(CURSOR_KEY).await.unwrap().as_deref(), Some("0"));
    assert_eq!(out.status.borrow().last_seq, 0);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cursor_store_failure_does_not_stop_delivery() {
    let mut kv = MockKv::new();
    kv.expect_get()
        .with(eq(CURSOR_KEY))
        .times(1)
        .returning(|_| Ok(Some("12".to_string())));
    kv.expect_set()
        .with(eq(CURSOR_KEY), always())
        .times(1..)
        .returning(|_, _| Err(anyhow::anyhow!("disk full")));

    let connector = ScriptedConnector::new(vec![vec![
        frame("live", &[12, 13]),
        frame("live", &[14]),
        Step::Hold,
    ]]);
    let (client, _handle, mut out) = FeedClient::new(&test_config(), connector, Arc::new(kv))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    assert_eq!(seqs(&out.samples.recv().await.unwrap()), vec![13]);
    assert_eq!(seqs(&out.samples.recv().await.unwrap()), vec![14]);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_malformed_persisted_cursor_starts_from_zero() {
    let connector = ScriptedConnector::new(vec![vec![Step::Hold]]);
    let store = Arc::new(MemoryStore::with_entry(CURSOR_KEY, "not-a-number"));
    let (client, _handle, _out) = FeedClient::new(&test_config(), connector.clone(), store)
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = tokio::spawn(client.run(shutdown_tx.subscribe()));

    tokio::time::timeout(Duration::from_secs(2), async {
        while connector.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(connector.sent()[0], r#"{"type":"resume","from_seq":1}"#);

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_feed_to_store_pipeline() {
    let connector = ScriptedConnector::new(vec![vec![
        control(json!({"type": "init_begin", "min_seq": 1, "wm_seq": 3})),
        frame("history", &[1, 2, 3]),
        frame("delta", &[3, 4]),
        frame("live", &[5, 6]),
        Step::Close,
    ]]);
    let mut config = test_config();
    config.reconnect.enabled = false;

    let (client, _handle, feed) = FeedClient::new(&config, connector, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    let (pipeline, mut ingest) = IngestPipeline::new(&config);

    let (shutdown_tx, _) = broadcast::channel(1);
    let client_task = tokio::spawn(client.run(shutdown_tx.subscribe()));
    let pipeline_task = tokio::spawn(pipeline.run(feed.samples, shutdown_tx.subscribe()));

    let mut delivered = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while delivered.len() < 6 {
            let batch = ingest.samples.recv().await.unwrap();
            delivered.extend(seqs(&batch));
        }
    })
    .await
    .unwrap();
    assert_eq!(delivered, vec![1, 2, 3, 4, 5, 6]);

    let series = ingest.store.read().await.linearize("BTC").unwrap();
    assert_eq!(series.y, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let _ = shutdown_tx.send(());
    client_task.await.unwrap().unwrap();
    pipeline_task.await.unwrap().unwrap();
}
