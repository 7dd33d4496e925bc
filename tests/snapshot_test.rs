//! Snapshot and restore of the whole cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use huginn::cache::{CacheStore, FORMAT_VERSION, FileBackend};
use huginn::{
    CacheKey, EntryState, HuginnError, ManualClock, OperationKind, Request, ResponsePayload,
};
use tempfile::TempDir;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ))
}

fn key(text: &str) -> CacheKey {
    Request::text(OperationKind::Complete, text)
        .cache_key()
        .unwrap()
}

fn open(dir: &TempDir, clock: &Arc<ManualClock>) -> CacheStore {
    let backend = Arc::new(FileBackend::open(dir.path()).unwrap());
    CacheStore::open(backend, clock.clone()).unwrap()
}

#[test]
fn restore_brings_back_exact_state() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let store = open(&dir, &clock);

    store
        .put(key("a"), ResponsePayload::text("A"), "x".into())
        .unwrap();
    store
        .put(key("b"), ResponsePayload::text("B"), "y".into())
        .unwrap();
    store.set_state(&key("a"), EntryState::Accepted, None).unwrap();
    store.lookup(&key("a"), false).unwrap();
    let before = store.list(None);

    let info = store.snapshot("before-cleanup").unwrap();
    assert_eq!(info.name, "before-cleanup");
    assert_eq!(info.entries, 2);

    clock.advance(Duration::from_secs(10));
    store.clear(huginn::cache::ClearScope::All).unwrap();
    store
        .put(key("c"), ResponsePayload::text("C"), "z".into())
        .unwrap();

    let restored = store.restore("before-cleanup").unwrap();
    assert_eq!(restored.entries, 2);
    assert_eq!(store.list(None), before);
    assert!(store.get(&key("c")).is_none());
}

#[test]
fn restore_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    {
        let store = open(&dir, &clock);
        store
            .put(key("kept"), ResponsePayload::text("kept"), "x".into())
            .unwrap();
        store.snapshot("one").unwrap();
        store
            .put(key("dropped"), ResponsePayload::text("dropped"), "x".into())
            .unwrap();
        store.restore("one").unwrap();
    }

    let store = open(&dir, &clock);
    assert_eq!(store.len(), 1);
    assert!(store.get(&key("kept")).is_some());
    assert!(!dir.path().join("entries.staging").exists());
    assert!(!dir.path().join("entries.old").exists());
}

#[test]
fn missing_snapshot_leaves_cache_alone() {
    let store = CacheStore::in_memory();
    store
        .put(key("a"), ResponsePayload::text("A"), "x".into())
        .unwrap();

    let err = store.restore("never-taken").unwrap_err();
    assert!(matches!(err, HuginnError::SnapshotNotFound(name) if name == "never-taken"));
    assert_eq!(store.len(), 1);
}

#[test]
fn snapshot_names_must_be_file_safe() {
    let store = CacheStore::in_memory();
    assert!(matches!(
        store.snapshot("../etc/passwd"),
        Err(HuginnError::InvalidInput(_))
    ));
    assert!(matches!(store.restore(""), Err(HuginnError::InvalidInput(_))));
}

#[test]
fn snapshots_list_newest_first() {
    let clock = clock();
    let store = CacheStore::in_memory_with_clock(clock.clone());
    store
        .put(key("a"), ResponsePayload::text("A"), "x".into())
        .unwrap();

    store.snapshot("monday").unwrap();
    clock.advance(Duration::from_secs(86_400));
    store.snapshot("tuesday").unwrap();

    let names: Vec<_> = store
        .list_snapshots()
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert_eq!(names, vec!["tuesday", "monday"]);
}

#[test]
fn snapshot_with_same_name_is_replaced() {
    let store = CacheStore::in_memory();
    store.snapshot("daily").unwrap();
    store
        .put(key("a"), ResponsePayload::text("A"), "x".into())
        .unwrap();
    store.snapshot("daily").unwrap();

    let snapshots = store.list_snapshots().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].entries, 1);
}

#[test]
fn snapshot_file_is_versioned() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let store = open(&dir, &clock);
    store
        .put(key("a"), ResponsePayload::text("A"), "x".into())
        .unwrap();
    store.snapshot("v").unwrap();

    let bytes = std::fs::read(dir.path().join("snapshots").join("v.json")).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["version"], FORMAT_VERSION);
    assert_eq!(json["entries"].as_array().unwrap().len(), 1);
    assert!(json.get("createdAt").is_some());
}
