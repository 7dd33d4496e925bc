//! Persistence backends for the cache store.
//!
//! The store keeps every entry in memory and writes through to a
//! [`CacheBackend`] before committing a change, so a failed write leaves
//! both sides untouched.
//!
//! [`FileBackend`] layout:
//!
//! ```text
//! <root>/
//!   entries/<key>.json       one CacheEntry per file
//!   snapshots/<name>.json    one Snapshot per file
//! ```
//!
//! Files are written to a temporary sibling and renamed into place.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use super::snapshot::{Snapshot, SnapshotInfo};
use super::CacheEntry;
use crate::types::CacheKey;
use crate::{HuginnError, Result};

/// Durable storage for cache entries and snapshots.
///
/// Calls are synchronous and short; the store serializes them per key.
pub trait CacheBackend: Send + Sync + fmt::Debug {
    /// Every persisted entry, in no particular order.
    fn load_all(&self) -> Result<Vec<CacheEntry>>;

    /// Create or overwrite one entry.
    fn write_entry(&self, entry: &CacheEntry) -> Result<()>;

    /// Remove one entry. Removing a missing entry is not an error.
    fn remove_entry(&self, key: &CacheKey) -> Result<()>;

    /// Replace the whole entry set.
    fn replace_all(&self, entries: &[CacheEntry]) -> Result<()>;

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// Fails with [`HuginnError::SnapshotNotFound`] for unknown names.
    fn read_snapshot(&self, name: &str) -> Result<Snapshot>;

    fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>>;
}

/// Directory-backed storage that survives restarts.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a cache directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let backend = Self { root: root.into() };
        fs::create_dir_all(backend.entries_dir())?;
        fs::create_dir_all(backend.snapshots_dir())?;
        Ok(backend)
    }

    /// `<data dir>/huginn`, e.g. `~/.local/share/huginn` on Linux.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("huginn"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join("entries")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    fn entry_path(dir: &Path, key: &CacheKey) -> Result<PathBuf> {
        if !key.is_well_formed() {
            return Err(HuginnError::InvalidInput(format!(
                "cache key '{key}' is not a hex digest"
            )));
        }
        Ok(dir.join(format!("{key}.json")))
    }

    fn read_dir_json(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for item in fs::read_dir(dir)? {
            let path = item?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

impl CacheBackend for FileBackend {
    fn load_all(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for path in Self::read_dir_json(&self.entries_dir())? {
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
            }
        }
        Ok(entries)
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        let path = Self::entry_path(&self.entries_dir(), &entry.key)?;
        write_atomic(&path, &serde_json::to_vec_pretty(entry)?)
    }

    fn remove_entry(&self, key: &CacheKey) -> Result<()> {
        let path = Self::entry_path(&self.entries_dir(), key)?;
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn replace_all(&self, entries: &[CacheEntry]) -> Result<()> {
        let live = self.entries_dir();
        let staging = self.root.join("entries.staging");
        let retired = self.root.join("entries.old");
        remove_dir_if_exists(&staging)?;
        remove_dir_if_exists(&retired)?;

        fs::create_dir_all(&staging)?;
        for entry in entries {
            let path = Self::entry_path(&staging, &entry.key)?;
            fs::write(path, serde_json::to_vec_pretty(entry)?)?;
        }

        fs::rename(&live, &retired)?;
        fs::rename(&staging, &live)?;
        remove_dir_if_exists(&retired)
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.snapshots_dir().join(format!("{}.json", snapshot.name));
        write_atomic(&path, &serde_json::to_vec_pretty(snapshot)?)
    }

    fn read_snapshot(&self, name: &str) -> Result<Snapshot> {
        let path = self.snapshots_dir().join(format!("{name}.json"));
        match fs::read(&path) {
            Ok(bytes) => Snapshot::from_json(&bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(HuginnError::SnapshotNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        let mut infos = Vec::new();
        for path in Self::read_dir_json(&self.snapshots_dir())? {
            match Snapshot::from_json(&fs::read(&path)?) {
                Ok(snapshot) => infos.push(snapshot.info()),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        Ok(infos)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// In-memory backend: nothing outlives the process.
///
/// Entries live only in the store itself; snapshots are kept here so that
/// snapshot/restore still work in tests and throwaway routers.
#[derive(Debug, Default)]
pub struct EphemeralBackend {
    snapshots: Mutex<BTreeMap<String, Snapshot>>,
}

impl EphemeralBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for EphemeralBackend {
    fn load_all(&self) -> Result<Vec<CacheEntry>> {
        Ok(Vec::new())
    }

    fn write_entry(&self, _entry: &CacheEntry) -> Result<()> {
        Ok(())
    }

    fn remove_entry(&self, _key: &CacheKey) -> Result<()> {
        Ok(())
    }

    fn replace_all(&self, _entries: &[CacheEntry]) -> Result<()> {
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.name.clone(), snapshot.clone());
        Ok(())
    }

    fn read_snapshot(&self, name: &str) -> Result<Snapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HuginnError::SnapshotNotFound(name.to_string()))
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Snapshot::info)
            .collect())
    }
}
