use serde_json::{Value, json};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use topic_recorder::broker::{Broker, ConnectionHandler, ConnectionStatus, StatusWatcher, connection_status};
use topic_recorder::clock::Shutdown;
use topic_recorder::record::{DurableLog, LogEntry};
use topic_recorder::recorder::{Recorder, Resume};
use topic_recorder::replayer::{ReplayOptions, Replayer};
use topic_recorder::{Error, Result};

#[derive(Default)]
struct FakeBroker {
    published: Mutex<Vec<(String, Vec<u8>, Instant)>>,
    disconnects: Mutex<u32>,
}

impl FakeBroker {
    fn published(&self) -> Vec<(String, Vec<u8>, Instant)> {
        self.published.lock().unwrap().clone()
    }
}

impl Broker for FakeBroker {
    fn subscribe(&self, _pattern: &str) -> Result<()> {
        Ok(())
    }
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, Instant::now()));
        Ok(())
    }
    fn disconnect(&self) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        Ok(())
    }
}

fn connected(broker: &FakeBroker) -> (StatusWatcher, ConnectionStatus) {
    let (mut watcher, status) = connection_status();
    watcher.on_connected(broker);
    (watcher, status)
}

fn options() -> ReplayOptions {
    ReplayOptions {
        recording_base: "/charlie".into(),
        replay_base: "/charlie_replay".into(),
        connect_timeout: Duration::from_millis(200),
    }
}

fn write_entries(path: &Path, stamps: &[f64]) {
    let mut log = DurableLog::new(path);
    for (i, ts) in stamps.iter().enumerate() {
        log.append(&LogEntry {
            timestamp: *ts,
            topic: format!("/charlie/sensor/{i}"),
            payload: json!({ "i": i }),
            message_index: i as u64,
        })
        .unwrap();
    }
}

fn indices(path: &Path) -> Vec<u64> {
    DurableLog::new(path)
        .read_all()
        .unwrap()
        .map(|e| e.unwrap().message_index)
        .collect()
}

#[test]
fn indices_are_gapless_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");

    let mut first = Recorder::new(DurableLog::new(&path), "/charlie");
    assert!(matches!(first.resume(), Resume::Fresh));
    for i in 0..3 {
        first.on_message("/charlie/a", json!({ "n": i }).to_string().as_bytes());
    }
    drop(first);

    let mut second = Recorder::new(DurableLog::new(&path), "/charlie");
    assert!(matches!(second.resume(), Resume::Continue { next_index: 3 }));
    second.on_message("/charlie/b", b"[1,2]");
    second.on_message("/charlie/b", b"oops");
    second.on_message("/charlie/b", b"true");

    assert_eq!(indices(&path), vec![0, 1, 2, 3, 4]);
}

#[test]
fn corrupt_tail_restarts_at_zero_and_is_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    write_entries(&path, &[1.0, 2.0]);
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"{\"timestamp\": 3.0, \"topic\": \"/charlie\", \"payload\": 1}\n").unwrap();

    let mut rec = Recorder::new(DurableLog::new(&path), "/charlie");
    assert!(matches!(rec.resume(), Resume::CorruptTail(Error::CorruptTail { .. })));
    assert_eq!(rec.next_index(), 0);
}

#[test]
fn replay_round_trips_payloads_and_rewrites_topics() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    let payloads = [
        json!({ "z": 1, "a": [1.5, null, "s"] }),
        json!(3.25),
        json!("text"),
        json!({ "nested": { "deep": true } }),
    ];
    let topics = ["/charlie", "/charlie/imu", "/elsewhere/charlie", "/charlie/gps/fix"];
    let mut rec = Recorder::new(DurableLog::new(&path), "/charlie");
    rec.resume();
    for (topic, payload) in topics.iter().zip(&payloads) {
        rec.record(topic, payload.to_string().as_bytes()).unwrap();
    }

    let broker = FakeBroker::default();
    let (_watcher, status) = connected(&broker);
    let summary = Replayer::new(&broker, &status, DurableLog::new(&path), options())
        .start(1000.0)
        .unwrap();

    assert_eq!(summary.published, 4);
    assert!(!summary.cancelled);
    assert_eq!(*broker.disconnects.lock().unwrap(), 1);
    let published = broker.published();
    let got_topics: Vec<&str> = published.iter().map(|(t, _, _)| t.as_str()).collect();
    assert_eq!(
        got_topics,
        vec!["/charlie_replay", "/charlie_replay/imu", "/elsewhere/charlie", "/charlie_replay/gps/fix"]
    );
    for ((_, bytes, _), expected) in published.iter().zip(&payloads) {
        let got: Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(&got, expected);
    }
    // key order survives
    assert_eq!(published[0].1, br#"{"z":1,"a":[1.5,null,"s"]}"#.to_vec());
}

#[test]
fn replay_scales_original_timing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    write_entries(&path, &[1_700_000_000.0, 1_700_000_001.0, 1_700_000_002.5]);

    let broker = FakeBroker::default();
    let (_watcher, status) = connected(&broker);
    let start = Instant::now();
    Replayer::new(&broker, &status, DurableLog::new(&path), options())
        .start(2.0)
        .unwrap();

    let offsets: Vec<f64> = broker
        .published()
        .iter()
        .map(|(_, _, at)| at.duration_since(start).as_secs_f64())
        .collect();
    let expected = [0.0, 0.5, 1.25];
    assert_eq!(offsets.len(), expected.len());
    for (got, want) in offsets.iter().zip(expected) {
        assert!((got - want).abs() < 0.05, "published at {got:.3}s, expected {want:.3}s");
    }
}

#[test]
fn non_positive_speed_fails_before_any_io() {
    let dir = tempfile::tempdir().unwrap();
    let broker = FakeBroker::default();
    // never connected, log missing: only argument validation can run
    let (_watcher, status) = connection_status();
    let replayer = Replayer::new(&broker, &status, DurableLog::new(dir.path().join("missing.log")), options());

    for speed in [-1.0, 0.0, f64::NAN] {
        let start = Instant::now();
        assert!(matches!(replayer.start(speed), Err(Error::InvalidArgument(_))));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
    assert!(broker.published().is_empty());
    assert_eq!(*broker.disconnects.lock().unwrap(), 0);
}

#[test]
fn empty_log_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.log");
    fs::File::create(&path).unwrap();

    let broker = FakeBroker::default();
    let (_watcher, status) = connected(&broker);
    let start = Instant::now();
    let summary = Replayer::new(&broker, &status, DurableLog::new(&path), options())
        .start(1.0)
        .unwrap();
    assert_eq!(summary.published, 0);
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn replay_without_connection_fails_after_bounded_wait() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    write_entries(&path, &[1.0]);

    let broker = FakeBroker::default();
    let (_watcher, status) = connection_status();
    let start = Instant::now();
    let res = Replayer::new(&broker, &status, DurableLog::new(&path), options()).start(1.0);
    assert!(matches!(res, Err(Error::NotConnected(_))));
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(broker.published().is_empty());
}

#[test]
fn corrupt_entry_aborts_replay_with_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    write_entries(&path, &[1.0]);
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"{broken\n").unwrap();
    drop(f);
    let mut log = DurableLog::new(&path);
    log.append(&LogEntry {
        timestamp: 1.0,
        topic: "/charlie/x".into(),
        payload: json!(null),
        message_index: 2,
    })
    .unwrap();

    let broker = FakeBroker::default();
    let (_watcher, status) = connected(&broker);
    match Replayer::new(&broker, &status, DurableLog::new(&path), options()).start(1.0) {
        Err(Error::CorruptEntry { line, path: p, .. }) => {
            assert_eq!(line, 2);
            assert_eq!(p, path);
        }
        other => panic!("expected CorruptEntry, got {other:?}"),
    }
    assert_eq!(broker.published().len(), 1);
}

#[test]
fn shutdown_cancels_a_long_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    write_entries(&path, &[0.0, 30.0, 60.0]);

    let broker = FakeBroker::default();
    let (_watcher, status) = connected(&broker);
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        trigger.trigger();
    });

    let start = Instant::now();
    let summary = Replayer::new(&broker, &status, DurableLog::new(&path), options())
        .with_shutdown(shutdown)
        .start(1.0)
        .unwrap();
    handle.join().unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.published, 1);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(*broker.disconnects.lock().unwrap(), 1);
}

#[test]
fn shutdown_during_connect_wait_returns_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.log");
    write_entries(&path, &[1.0]);

    let broker = FakeBroker::default();
    let (_watcher, status) = connection_status();
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        trigger.trigger();
    });

    let start = Instant::now();
    let summary = Replayer::new(
        &broker,
        &status,
        DurableLog::new(&path),
        ReplayOptions {
            connect_timeout: Duration::from_secs(30),
            ..options()
        },
    )
    .with_shutdown(shutdown)
    .start(1.0)
    .unwrap();
    handle.join().unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.published, 0);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(broker.published().is_empty());
}
