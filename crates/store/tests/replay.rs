#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use kfzf_core::{EventKind, ResourceType, WatchEvent};
use kfzf_persist::load_snapshot;
use kfzf_store::{spawn_ingest, spawn_persist_ticker, Store, StoreConfig};
use tokio_util::sync::CancellationToken;

fn obj(name: &str, ns: Option<&str>, phase: &str) -> serde_json::Value {
    let mut meta = serde_json::json!({
        "name": name,
        "creationTimestamp": "2020-01-01T00:00:00Z",
        "labels": {"app": name},
    });
    if let Some(ns) = ns { meta["namespace"] = serde_json::Value::String(ns.to_string()); }
    serde_json::json!({ "metadata": meta, "status": { "phase": phase } })
}

fn store(dir: &tempfile::TempDir, interval: Duration) -> Store {
    let cfg = StoreConfig { min_persist_interval: interval, ..StoreConfig::default() };
    Store::new(ResourceType::Pod, dir.path().join("pods"), cfg)
}

#[test]
fn replay_keeps_one_entry_per_key() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir, Duration::from_secs(10));

    let events = vec![
        (EventKind::Add, obj("a", Some("ns"), "Pending")),
        (EventKind::Add, obj("a", Some("ns"), "Pending")),
        (EventKind::Add, obj("a", Some("other"), "Pending")),
        (EventKind::Update, obj("a", Some("ns"), "Running")),
        (EventKind::Add, obj("b", Some("ns"), "Running")),
        (EventKind::Delete, obj("b", Some("ns"), "Running")),
        // delete of an unknown key is a no-op
        (EventKind::Delete, obj("zzz", Some("ns"), "Running")),
    ];
    for (kind, raw) in &events { s.apply_event(*kind, raw); }

    let snap = s.snapshot();
    assert_eq!(snap.len(), 2);
    let a = &snap["ns_a"];
    assert_eq!(a.field_selectors.iter().find(|(k, _)| k == "status.phase").map(|(_, v)| v.as_str()), Some("Running"));
    assert!(snap.contains_key("other_a"));
    assert!(!snap.contains_key("ns_b"));
}

#[test]
fn update_for_unknown_key_inserts() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir, Duration::from_secs(10));
    assert!(s.apply_event(EventKind::Update, &obj("late", Some("ns"), "Running")));
    assert_eq!(s.len(), 1);
}

#[test]
fn replace_all_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir, Duration::from_secs(10));
    s.apply_event(EventKind::Add, &obj("stale", Some("ns"), "Running"));
    let items = vec![obj("a", Some("ns"), "Running"), obj("b", None, "Running")];
    s.replace_all(&items);
    let once = s.snapshot();
    s.replace_all(&items);
    assert_eq!(s.snapshot(), once);
    assert_eq!(once.len(), 2);
    assert!(once.contains_key("None_b"));
    assert!(s.is_dirty());
}

#[test]
fn burst_within_interval_writes_once() {
    let dir = tempfile::tempdir().unwrap();
    let interval = Duration::from_secs(1);
    let s = store(&dir, interval);

    s.apply_event(EventKind::Add, &obj("a", Some("ns"), "Pending"));
    assert!(s.persist_if_due().unwrap());
    assert_eq!(s.persist_count(), 1);

    for i in 0..50 {
        s.apply_event(EventKind::Update, &obj("a", Some("ns"), &format!("phase-{}", i)));
        assert!(!s.persist_if_due().unwrap());
    }
    assert_eq!(s.persist_count(), 1);
    assert!(s.is_dirty());

    std::thread::sleep(interval + Duration::from_millis(50));
    assert!(s.persist_if_due().unwrap());
    assert_eq!(s.persist_count(), 2);
    assert!(!s.is_dirty());
    assert_eq!(load_snapshot(s.path()).unwrap(), s.snapshot());
    // nothing new: no write
    assert!(!s.persist_if_due().unwrap());
}

#[tokio::test]
async fn ingest_and_ticker_persist_final_state() {
    let dir = tempfile::tempdir().unwrap();
    let s = Arc::new(store(&dir, Duration::from_secs(1)));
    let cancel = CancellationToken::new();
    let (tx, ingest) = spawn_ingest(Arc::clone(&s), 16, cancel.clone());

    tx.send(WatchEvent::Replace { namespace: None, items: vec![obj("a", Some("ns1"), "Running"), obj("b", Some("ns2"), "Running")] }).await.unwrap();
    tx.send(WatchEvent::Object(EventKind::Delete, obj("a", Some("ns1"), "Running"))).await.unwrap();
    tx.send(WatchEvent::Replace { namespace: Some("ns2".into()), items: vec![obj("c", Some("ns2"), "Running")] }).await.unwrap();
    // closing the queue lets the ingest loop drain and exit
    drop(tx);
    ingest.await.unwrap();
    assert!(s.is_dirty());
    assert_eq!(s.persist_count(), 0);

    // first tick is immediate and nothing was persisted yet, so it writes at once
    let ticker = spawn_persist_ticker(Arc::clone(&s), cancel.clone());
    let mut waited = Duration::ZERO;
    while s.persist_count() == 0 && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    cancel.cancel();
    ticker.await.unwrap();

    assert_eq!(s.persist_count(), 1);
    assert!(!s.is_dirty());
    let on_disk = load_snapshot(s.path()).unwrap();
    assert_eq!(on_disk.len(), 1);
    assert!(on_disk.contains_key("ns2_c"));
    assert_eq!(on_disk, s.snapshot());
}
