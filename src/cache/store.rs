//! The cache store: sole owner and mutator of cache entries.
//!
//! # Locking
//!
//! Each key has its own slot (`Arc<Mutex<Option<CacheEntry>>>`). `get`,
//! `put`, `set_state` and the other single-key operations hold that slot's
//! mutex for their whole read-persist-commit sequence, so operations on one
//! key are serialized while unrelated keys proceed in parallel. The outer
//! map lock is only taken to find or create a slot.
//!
//! Slots are never removed from the map; deleting an entry empties its slot.
//! Operations that span every key (`snapshot`, `restore`, `clear(All)`)
//! lock all slots in key order, which keeps them deadlock-free against each
//! other and gives them a consistent view. `restore` and `clear(All)` also
//! hold the map write lock so no new key is created while the backend
//! swaps its storage.
//!
//! Every mutation is written to the [`CacheBackend`] first and committed in
//! memory only when that succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, EphemeralBackend, FileBackend};
use super::snapshot::{self, Snapshot, SnapshotInfo};
use super::{CacheEntry, EntryState};
use crate::clock::{Clock, SystemClock};
use crate::providers::CredentialId;
use crate::telemetry;
use crate::types::{CacheKey, ResponsePayload};
use crate::{HuginnError, Result};

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// What [`CacheStore::clear()`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearScope {
    Key(CacheKey),
    All,
}

/// Entry counts and access totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub edited: usize,
    pub total_hits: u64,
    pub average_hits: f64,
}

/// Persistent key → entry map with the review state machine.
#[derive(Debug)]
pub struct CacheStore {
    slots: RwLock<HashMap<CacheKey, Slot>>,
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Load every persisted entry from `backend`.
    pub fn open(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        let slots: HashMap<CacheKey, Slot> = backend
            .load_all()?
            .into_iter()
            .map(|entry| (entry.key.clone(), Arc::new(Mutex::new(Some(entry)))))
            .collect();
        debug!(entries = slots.len(), "cache store opened");
        Ok(Self {
            slots: RwLock::new(slots),
            backend,
            clock,
        })
    }

    /// A store backed by a directory on disk, on the system clock.
    pub fn open_dir(root: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open(Arc::new(FileBackend::open(root)?), Arc::new(SystemClock))
    }

    /// A store that forgets everything when dropped.
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            backend: Arc::new(EphemeralBackend::new()),
            clock,
        }
    }

    /// Current time on the store's clock, the reference for
    /// [`put_unless_superseded()`](Self::put_unless_superseded).
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn existing_slot(&self, key: &CacheKey) -> Option<Slot> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// All slots sorted by key, for operations that lock every entry.
    fn sorted_slots(&self) -> Vec<(CacheKey, Slot)> {
        sorted(&self.slots.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The entry under `key`, whatever its state. Does not count as a hit.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.existing_slot(key)?;
        let entry = lock(&slot).clone();
        entry
    }

    /// The entry under `key` if a lookup may serve it; records the hit.
    pub fn lookup(&self, key: &CacheKey, trust_pending: bool) -> Option<CacheEntry> {
        let slot = self.existing_slot(key)?;
        let mut guard = lock(&slot);
        let current = guard.as_ref()?;
        if !current.is_usable(trust_pending) {
            return None;
        }

        let mut updated = current.clone();
        updated.hit_count = updated.hit_count.saturating_add(1);
        updated.last_accessed = Some(self.clock.now());
        // Hit statistics are best effort; a failed write still serves the entry.
        if let Err(e) = self.backend.write_entry(&updated) {
            warn!(key = %key, error = %e, "failed to persist cache hit");
        }
        *guard = Some(updated.clone());
        Some(updated)
    }

    /// Store a fresh provider answer as pending, replacing any prior entry.
    pub fn put(
        &self,
        key: CacheKey,
        payload: ResponsePayload,
        provider_id: CredentialId,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry::pending(key, payload, provider_id, self.clock.now());
        let slot = self.slot(&entry.key);
        let mut guard = lock(&slot);
        self.commit(&mut guard, entry)
    }

    /// Like [`put()`](Self::put), but skipped when the key already holds an
    /// entry created after `issued_at` (a newer answer won the race).
    ///
    /// Returns the stored entry, or `None` when the write was skipped.
    pub fn put_unless_superseded(
        &self,
        key: CacheKey,
        payload: ResponsePayload,
        provider_id: CredentialId,
        issued_at: DateTime<Utc>,
        prompt: Option<String>,
    ) -> Result<Option<CacheEntry>> {
        let slot = self.slot(&key);
        let mut guard = lock(&slot);
        if let Some(existing) = guard.as_ref()
            && existing.created_at > issued_at
        {
            debug!(key = %key, "newer cache entry present, dropping stale result");
            return Ok(None);
        }

        let mut entry = CacheEntry::pending(key, payload, provider_id, self.clock.now());
        entry.prompt = prompt;
        self.commit(&mut guard, entry).map(Some)
    }

    fn commit(
        &self,
        guard: &mut MutexGuard<'_, Option<CacheEntry>>,
        entry: CacheEntry,
    ) -> Result<CacheEntry> {
        self.backend.write_entry(&entry)?;
        debug!(key = %entry.key, provider = %entry.provider_id, "cached pending entry");
        **guard = Some(entry.clone());
        Ok(entry)
    }

    /// Apply a review transition.
    ///
    /// `edited` is required for (and only allowed with) [`EntryState::Edited`]
    /// and must not be empty.
    pub fn set_state(
        &self,
        key: &CacheKey,
        to: EntryState,
        edited: Option<ResponsePayload>,
    ) -> Result<CacheEntry> {
        let slot = self
            .existing_slot(key)
            .ok_or_else(|| HuginnError::EntryNotFound(key.clone()))?;
        let mut guard = lock(&slot);
        let current = guard
            .as_ref()
            .ok_or_else(|| HuginnError::EntryNotFound(key.clone()))?;

        let from = current.state;
        if !from.can_transition_to(to) {
            return Err(HuginnError::InvalidTransition {
                key: key.clone(),
                from,
                to,
            });
        }
        let edited = match (to, edited) {
            (EntryState::Edited, Some(payload)) if !payload.is_empty() => Some(payload),
            (EntryState::Edited, _) => {
                return Err(HuginnError::InvalidInput(
                    "an edit needs a non-empty payload".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(HuginnError::InvalidInput(format!(
                    "an edited payload cannot accompany a transition to {to}"
                )));
            }
            (_, None) => current.edited_payload.clone(),
        };

        let mut updated = current.clone();
        updated.state = to;
        updated.edited_payload = edited;
        self.backend.write_entry(&updated)?;
        *guard = Some(updated.clone());

        metrics::counter!(telemetry::CACHE_TRANSITIONS_TOTAL,
            "from" => from.as_str(),
            "to" => to.as_str(),
        )
        .increment(1);
        debug!(key = %key, %from, %to, "cache entry transitioned");
        Ok(updated)
    }

    /// Entries, optionally filtered by state, newest first.
    pub fn list(&self, state: Option<EntryState>) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self
            .sorted_slots()
            .into_iter()
            .filter_map(|(_, slot)| lock(&slot).clone())
            .filter(|entry| state.is_none_or(|s| entry.state == s))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key)));
        entries
    }

    /// Remove one entry. Fails with [`HuginnError::EntryNotFound`] if absent.
    pub fn delete(&self, key: &CacheKey) -> Result<CacheEntry> {
        let slot = self
            .existing_slot(key)
            .ok_or_else(|| HuginnError::EntryNotFound(key.clone()))?;
        let mut guard = lock(&slot);
        if guard.is_none() {
            return Err(HuginnError::EntryNotFound(key.clone()));
        }
        self.backend.remove_entry(key)?;
        guard.take().ok_or_else(|| HuginnError::EntryNotFound(key.clone()))
    }

    /// Remove one entry or all of them. Returns how many were removed.
    pub fn clear(&self, scope: ClearScope) -> Result<usize> {
        match scope {
            ClearScope::Key(key) => match self.delete(&key) {
                Ok(_) => Ok(1),
                Err(HuginnError::EntryNotFound(_)) => Ok(0),
                Err(e) => Err(e),
            },
            ClearScope::All => {
                // A put on a new key would write into the directory being swapped out.
                let map = self.slots.write().unwrap_or_else(PoisonError::into_inner);
                let slots = sorted(&map);
                let mut guards: Vec<_> = slots.iter().map(|(_, slot)| lock(slot)).collect();
                self.backend.replace_all(&[])?;
                let removed = guards.iter_mut().filter_map(|guard| guard.take()).count();
                drop(guards);
                drop(map);
                info!(removed, "cache cleared");
                Ok(removed)
            }
        }
    }

    /// Totals per state plus hit counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in self.list(None) {
            stats.total += 1;
            stats.total_hits += entry.hit_count;
            match entry.state {
                EntryState::Pending => stats.pending += 1,
                EntryState::Accepted => stats.accepted += 1,
                EntryState::Rejected => stats.rejected += 1,
                EntryState::Edited => stats.edited += 1,
            }
        }
        if stats.total > 0 {
            stats.average_hits = stats.total_hits as f64 / stats.total as f64;
        }
        stats
    }

    /// Delete entries not served (or, if never served, not created) within
    /// `max_age`. Returns how many were removed.
    pub fn purge_idle(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| HuginnError::InvalidInput(format!("purge age out of range: {e}")))?;
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        for (key, slot) in self.sorted_slots() {
            let mut guard = lock(&slot);
            if guard.as_ref().is_some_and(|entry| entry.last_activity() < cutoff) {
                self.backend.remove_entry(&key)?;
                *guard = None;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "purged idle cache entries");
        }
        Ok(removed)
    }

    /// Save every entry under `name`, replacing an older snapshot of that name.
    pub fn snapshot(&self, name: &str) -> Result<SnapshotInfo> {
        snapshot::validate_name(name)?;
        let slots = self.sorted_slots();
        let guards: Vec<_> = slots.iter().map(|(_, slot)| lock(slot)).collect();
        let entries = guards.iter().filter_map(|guard| (**guard).clone()).collect();
        let snapshot = Snapshot::new(name, self.clock.now(), entries);
        self.backend.write_snapshot(&snapshot)?;
        drop(guards);

        info!(snapshot = name, entries = snapshot.entries.len(), "cache snapshot written");
        Ok(snapshot.info())
    }

    /// Replace the whole cache with the contents of snapshot `name`.
    pub fn restore(&self, name: &str) -> Result<SnapshotInfo> {
        snapshot::validate_name(name)?;
        let snapshot = self.backend.read_snapshot(name)?;

        // Holding the map write lock keeps new keys out while slots are swapped.
        let mut map = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slots = sorted(&map);
        let mut guards: Vec<_> = slots.iter().map(|(key, slot)| (key, lock(slot))).collect();

        self.backend.replace_all(&snapshot.entries)?;

        let mut incoming: HashMap<CacheKey, CacheEntry> = snapshot
            .entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.clone()))
            .collect();
        for (key, guard) in guards.iter_mut() {
            **guard = incoming.remove(*key);
        }
        drop(guards);
        for (key, entry) in incoming {
            map.insert(key, Arc::new(Mutex::new(Some(entry))));
        }

        info!(snapshot = name, entries = snapshot.entries.len(), "cache restored from snapshot");
        Ok(snapshot.info())
    }

    /// Stored snapshots, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut infos = self.backend.list_snapshots()?;
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(infos)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.sorted_slots()
            .iter()
            .filter(|(_, slot)| lock(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sorted(map: &HashMap<CacheKey, Slot>) -> Vec<(CacheKey, Slot)> {
    let mut slots: Vec<_> = map
        .iter()
        .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
        .collect();
    slots.sort_by(|a, b| a.0.cmp(&b.0));
    slots
}

fn lock(slot: &Mutex<Option<CacheEntry>>) -> MutexGuard<'_, Option<CacheEntry>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
