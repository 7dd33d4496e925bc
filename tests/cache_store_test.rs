//! Cache store: review transitions, persistence and maintenance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use huginn::cache::{CacheBackend, CacheStore, ClearScope, FileBackend};
use huginn::{
    CacheKey, Clock, CredentialId, EntryState, HuginnError, ManualClock, OperationKind, Request,
    ResponsePayload,
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

fn store_with_entry() -> (CacheStore, CacheKey) {
    let store = CacheStore::in_memory_with_clock(clock());
    let key = key("hello");
    store
        .put(key.clone(), ResponsePayload::text("hi"), "groq#1".into())
        .unwrap();
    (store, key)
}

// ============================================================================
// Transitions
// ============================================================================

#[test]
fn put_stores_pending_entry() {
    let (store, key) = store_with_entry();
    let entry = store.get(&key).unwrap();
    assert_eq!(entry.state, EntryState::Pending);
    assert_eq!(entry.provider_id, CredentialId::from("groq#1"));
    assert_eq!(entry.hit_count, 0);
    assert!(store.lookup(&key, false).is_none());
}

#[test]
fn accept_then_reject() {
    let (store, key) = store_with_entry();

    let accepted = store.set_state(&key, EntryState::Accepted, None).unwrap();
    assert_eq!(accepted.state, EntryState::Accepted);
    assert!(store.lookup(&key, false).is_some());

    let rejected = store.set_state(&key, EntryState::Rejected, None).unwrap();
    assert_eq!(rejected.state, EntryState::Rejected);
    assert!(store.lookup(&key, true).is_none());
    // Rejected entries stay for audit.
    assert!(store.get(&key).is_some());
}

#[test]
fn edit_keeps_original_payload() {
    let (store, key) = store_with_entry();

    let edited = store
        .set_state(&key, EntryState::Edited, Some(ResponsePayload::text("hello there")))
        .unwrap();
    assert_eq!(edited.payload.as_text(), Some("hi"));
    assert_eq!(edited.served_payload().as_text(), Some("hello there"));

    let served = store.lookup(&key, false).unwrap();
    assert_eq!(served.served_payload().as_text(), Some("hello there"));
}

#[test]
fn illegal_transitions_leave_entry_unchanged() {
    let (store, key) = store_with_entry();
    store.set_state(&key, EntryState::Rejected, None).unwrap();

    let err = store
        .set_state(&key, EntryState::Accepted, None)
        .unwrap_err();
    assert!(matches!(
        err,
        HuginnError::InvalidTransition {
            from: EntryState::Rejected,
            to: EntryState::Accepted,
            ..
        }
    ));

    let err = store
        .set_state(&key, EntryState::Pending, None)
        .unwrap_err();
    assert!(matches!(err, HuginnError::InvalidTransition { .. }));
    assert_eq!(store.get(&key).unwrap().state, EntryState::Rejected);
}

#[test]
fn edited_entries_cannot_be_edited_again() {
    let (store, key) = store_with_entry();
    store
        .set_state(&key, EntryState::Edited, Some(ResponsePayload::text("one")))
        .unwrap();

    let err = store
        .set_state(&key, EntryState::Edited, Some(ResponsePayload::text("two")))
        .unwrap_err();
    assert!(matches!(err, HuginnError::InvalidTransition { .. }));
    assert_eq!(
        store.get(&key).unwrap().served_payload().as_text(),
        Some("one")
    );
}

#[test]
fn edit_payload_rules() {
    let (store, key) = store_with_entry();

    let err = store.set_state(&key, EntryState::Edited, None).unwrap_err();
    assert!(matches!(err, HuginnError::InvalidInput(_)));

    let err = store
        .set_state(&key, EntryState::Edited, Some(ResponsePayload::text("  ")))
        .unwrap_err();
    assert!(matches!(err, HuginnError::InvalidInput(_)));

    let err = store
        .set_state(&key, EntryState::Accepted, Some(ResponsePayload::text("x")))
        .unwrap_err();
    assert!(matches!(err, HuginnError::InvalidInput(_)));

    assert_eq!(store.get(&key).unwrap().state, EntryState::Pending);
}

#[test]
fn transitions_on_missing_key_fail() {
    let store = CacheStore::in_memory();
    let err = store
        .set_state(&key("nothing"), EntryState::Accepted, None)
        .unwrap_err();
    assert!(matches!(err, HuginnError::EntryNotFound(_)));
}

#[test]
fn new_answer_replaces_rejected_entry() {
    let (store, key) = store_with_entry();
    store.set_state(&key, EntryState::Rejected, None).unwrap();

    let entry = store
        .put(key.clone(), ResponsePayload::text("better"), "groq#2".into())
        .unwrap();
    assert_eq!(entry.state, EntryState::Pending);
    assert_eq!(entry.provider_id, CredentialId::from("groq#2"));
    assert_eq!(store.len(), 1);
}

#[test]
fn stale_answer_does_not_overwrite_newer_entry() {
    let clock = clock();
    let store = CacheStore::in_memory_with_clock(clock.clone());
    let key = key("race");

    let issued_at = clock.now();
    clock.advance(Duration::from_secs(5));
    store
        .put(key.clone(), ResponsePayload::text("fresh"), "b".into())
        .unwrap();

    let skipped = store
        .put_unless_superseded(
            key.clone(),
            ResponsePayload::text("stale"),
            "a".into(),
            issued_at,
            None,
        )
        .unwrap();
    assert!(skipped.is_none());
    assert_eq!(store.get(&key).unwrap().payload.as_text(), Some("fresh"));

    let written = store
        .put_unless_superseded(
            key.clone(),
            ResponsePayload::text("newest"),
            "a".into(),
            clock.now(),
            Some("race".into()),
        )
        .unwrap()
        .unwrap();
    assert_eq!(written.prompt.as_deref(), Some("race"));
}

// ============================================================================
// Reads, listing and stats
// ============================================================================

#[test]
fn lookup_counts_hits() {
    let clock = clock();
    let store = CacheStore::in_memory_with_clock(clock.clone());
    let key = key("hits");
    store
        .put(key.clone(), ResponsePayload::text("x"), "a".into())
        .unwrap();
    store.set_state(&key, EntryState::Accepted, None).unwrap();

    clock.advance(Duration::from_secs(60));
    store.lookup(&key, false).unwrap();
    let entry = store.lookup(&key, false).unwrap();

    assert_eq!(entry.hit_count, 2);
    assert_eq!(entry.last_accessed, Some(clock.now()));
    // get() is a plain read.
    assert_eq!(store.get(&key).unwrap().hit_count, 2);
}

#[test]
fn list_is_newest_first_and_filterable() {
    let clock = clock();
    let store = CacheStore::in_memory_with_clock(clock.clone());
    for text in ["one", "two", "three"] {
        store
            .put(key(text), ResponsePayload::text(text), "a".into())
            .unwrap();
        clock.advance(Duration::from_secs(1));
    }
    store
        .set_state(&key("two"), EntryState::Accepted, None)
        .unwrap();

    let all: Vec<_> = store
        .list(None)
        .into_iter()
        .map(|e| e.payload.as_text().unwrap().to_string())
        .collect();
    assert_eq!(all, vec!["three", "two", "one"]);

    let accepted = store.list(Some(EntryState::Accepted));
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].key, key("two"));
}

#[test]
fn stats_count_states_and_hits() {
    let store = CacheStore::in_memory();
    for text in ["a", "b", "c", "d"] {
        store
            .put(key(text), ResponsePayload::text(text), "x".into())
            .unwrap();
    }
    store.set_state(&key("a"), EntryState::Accepted, None).unwrap();
    store.set_state(&key("b"), EntryState::Rejected, None).unwrap();
    store
        .set_state(&key("c"), EntryState::Edited, Some("C".into()))
        .unwrap();
    store.lookup(&key("a"), false).unwrap();
    store.lookup(&key("a"), false).unwrap();

    let stats = store.stats();
    assert_eq!(stats.total, 4);
    assert_eq!(
        (stats.pending, stats.accepted, stats.rejected, stats.edited),
        (1, 1, 1, 1)
    );
    assert_eq!(stats.total_hits, 2);
    assert!((stats.average_hits - 0.5).abs() < f64::EPSILON);
}

#[test]
fn delete_and_clear() {
    let store = CacheStore::in_memory();
    for text in ["a", "b", "c"] {
        store
            .put(key(text), ResponsePayload::text(text), "x".into())
            .unwrap();
    }

    let removed = store.delete(&key("a")).unwrap();
    assert_eq!(removed.key, key("a"));
    assert!(matches!(
        store.delete(&key("a")),
        Err(HuginnError::EntryNotFound(_))
    ));

    assert_eq!(store.clear(ClearScope::Key(key("a"))).unwrap(), 0);
    assert_eq!(store.clear(ClearScope::Key(key("b"))).unwrap(), 1);
    assert_eq!(store.clear(ClearScope::All).unwrap(), 1);
    assert!(store.is_empty());
}

#[test]
fn purge_removes_idle_entries_only() {
    let clock = clock();
    let store = CacheStore::in_memory_with_clock(clock.clone());
    store
        .put(key("old"), ResponsePayload::text("old"), "a".into())
        .unwrap();
    store
        .put(key("used"), ResponsePayload::text("used"), "a".into())
        .unwrap();
    store
        .set_state(&key("used"), EntryState::Accepted, None)
        .unwrap();

    clock.advance(Duration::from_secs(20 * 24 * 60 * 60));
    store.lookup(&key("used"), false).unwrap();
    store
        .put(key("new"), ResponsePayload::text("new"), "a".into())
        .unwrap();
    clock.advance(Duration::from_secs(15 * 24 * 60 * 60));

    let removed = store.purge_idle(Duration::from_secs(30 * 24 * 60 * 60)).unwrap();
    assert_eq!(removed, 1);
    assert!(store.get(&key("old")).is_none());
    assert!(store.get(&key("used")).is_some());
    assert!(store.get(&key("new")).is_some());
}

#[test]
fn concurrent_puts_on_distinct_keys() {
    let store = Arc::new(CacheStore::in_memory());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for j in 0..25 {
                    let text = format!("prompt {i}-{j}");
                    store
                        .put(key(&text), ResponsePayload::text(text.clone()), "a".into())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.len(), 200);
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let key = key("persisted");
    {
        let store = open(&dir, &clock);
        store
            .put(key.clone(), ResponsePayload::text("kept"), "groq#1".into())
            .unwrap();
        store
            .set_state(&key, EntryState::Edited, Some("kept, edited".into()))
            .unwrap();
        store
            .put(
                self::key("binary"),
                ResponsePayload::Binary(vec![0x89, b'P', b'N', b'G']),
                "hf#1".into(),
            )
            .unwrap();
    }

    let store = open(&dir, &clock);
    assert_eq!(store.len(), 2);
    let entry = store.get(&key).unwrap();
    assert_eq!(entry.state, EntryState::Edited);
    assert_eq!(entry.served_payload().as_text(), Some("kept, edited"));
    assert_eq!(
        store.get(&self::key("binary")).unwrap().payload.as_bytes(),
        &[0x89, b'P', b'N', b'G']
    );
}

#[test]
fn puts_racing_a_full_clear_stay_durable() {
    for _ in 0..5 {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CacheStore::open_dir(dir.path()).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for i in 0..300 {
                    let text = format!("fresh {i}");
                    store
                        .put(key(&text), ResponsePayload::text(text.clone()), "a".into())
                        .unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };
        while !done.load(Ordering::SeqCst) {
            store.clear(ClearScope::All).unwrap();
        }
        writer.join().unwrap();

        let reopened = CacheStore::open_dir(dir.path()).unwrap();
        assert_eq!(store.len(), reopened.len());
        for entry in store.list(None) {
            assert!(reopened.get(&entry.key).is_some());
        }
    }
}

#[test]
fn deletes_are_persisted() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    {
        let store = open(&dir, &clock);
        store
            .put(key("gone"), ResponsePayload::text("x"), "a".into())
            .unwrap();
        store
            .put(key("stays"), ResponsePayload::text("y"), "a".into())
            .unwrap();
        store.delete(&key("gone")).unwrap();
    }

    let store = open(&dir, &clock);
    assert!(store.get(&key("gone")).is_none());
    assert!(store.get(&key("stays")).is_some());
}

#[test]
fn entry_files_are_camel_case_json() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let store = open(&dir, &clock);
    let key = key("on disk");
    store
        .put(key.clone(), ResponsePayload::text("x"), "a".into())
        .unwrap();

    let path = dir.path().join("entries").join(format!("{key}.json"));
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    assert_eq!(json["providerId"], "a");
    assert_eq!(json["state"], "pending");
    assert_eq!(json["payload"]["type"], "text");
}

#[test]
fn unreadable_entry_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    {
        let store = open(&dir, &clock);
        store
            .put(key("good"), ResponsePayload::text("x"), "a".into())
            .unwrap();
    }
    std::fs::write(dir.path().join("entries").join("ffff.json"), b"{ not json").unwrap();

    let store = open(&dir, &clock);
    assert_eq!(store.len(), 1);
}

#[test]
fn file_backend_refuses_non_hex_keys() {
    let dir = TempDir::new().unwrap();
    let backend = FileBackend::open(dir.path()).unwrap();
    let err = backend.remove_entry(&CacheKey::new("../escape")).unwrap_err();
    assert!(matches!(err, HuginnError::InvalidInput(_)));
}
