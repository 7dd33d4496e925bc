//! Review surface over the cache store.
//!
//! A thin, clonable handle for UIs, CLIs and review policies. Every action
//! goes through [`CacheStore`], so the same transition rules and per-key
//! locking apply as on the resolution path.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use huginn::cache::{CacheEditor, CacheStore, EntryState};
//! # use huginn::{CacheKey, ResponsePayload};
//! let store = Arc::new(CacheStore::in_memory());
//! let key = CacheKey::new("ab12");
//! store.put(key.clone(), ResponsePayload::text("hi"), "groq#1".into()).unwrap();
//!
//! let editor = CacheEditor::new(store);
//! assert_eq!(editor.pending().len(), 1);
//! editor.accept(&key).unwrap();
//! assert_eq!(editor.list_entries(Some(EntryState::Accepted)).len(), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::store::{CacheStats, CacheStore, ClearScope};
use super::{CacheEntry, EntryState, SnapshotInfo};
use crate::Result;
use crate::types::{CacheKey, ResponsePayload};

/// Default idle age for [`CacheEditor::purge_idle()`]: 30 days.
pub const DEFAULT_PURGE_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Consumer-facing review operations.
#[derive(Debug, Clone)]
pub struct CacheEditor {
    store: Arc<CacheStore>,
}

impl CacheEditor {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Entries in the given state (all when `None`), newest first.
    pub fn list_entries(&self, state: Option<EntryState>) -> Vec<CacheEntry> {
        self.store.list(state)
    }

    /// Entries waiting for review.
    pub fn pending(&self) -> Vec<CacheEntry> {
        self.store.list(Some(EntryState::Pending))
    }

    pub fn show(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.store.get(key)
    }

    /// Approve a pending entry for reuse.
    pub fn accept(&self, key: &CacheKey) -> Result<CacheEntry> {
        let entry = self.store.set_state(key, EntryState::Accepted, None)?;
        info!(key = %key, "cache entry accepted");
        Ok(entry)
    }

    /// Refuse a pending entry, or revoke an accepted one.
    pub fn reject(&self, key: &CacheKey) -> Result<CacheEntry> {
        let entry = self.store.set_state(key, EntryState::Rejected, None)?;
        info!(key = %key, "cache entry rejected");
        Ok(entry)
    }

    /// Replace a pending entry's payload with a reviewed one and approve it.
    pub fn edit(&self, key: &CacheKey, payload: impl Into<ResponsePayload>) -> Result<CacheEntry> {
        let entry = self
            .store
            .set_state(key, EntryState::Edited, Some(payload.into()))?;
        info!(key = %key, "cache entry edited");
        Ok(entry)
    }

    pub fn delete(&self, key: &CacheKey) -> Result<CacheEntry> {
        let entry = self.store.delete(key)?;
        info!(key = %key, "cache entry deleted");
        Ok(entry)
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        self.store.clear(ClearScope::All)
    }

    pub fn snapshot(&self, name: &str) -> Result<SnapshotInfo> {
        self.store.snapshot(name)
    }

    pub fn restore(&self, name: &str) -> Result<SnapshotInfo> {
        self.store.restore(name)
    }

    /// Stored snapshots, newest first.
    pub fn snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        self.store.list_snapshots()
    }

    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Delete entries idle for longer than `max_age`
    /// (see [`DEFAULT_PURGE_AGE`]).
    pub fn purge_idle(&self, max_age: Duration) -> Result<usize> {
        self.store.purge_idle(max_age)
    }
}
