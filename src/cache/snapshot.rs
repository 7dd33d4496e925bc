//! Point-in-time cache backups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CacheEntry;
use crate::{HuginnError, Result};

/// Current snapshot format. Readers refuse anything newer.
pub const FORMAT_VERSION: u32 = 1;

/// Every cache entry at one instant, ordered by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<CacheEntry>,
}

impl Snapshot {
    pub(crate) fn new(name: &str, created_at: DateTime<Utc>, mut entries: Vec<CacheEntry>) -> Self {
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            version: FORMAT_VERSION,
            name: name.to_string(),
            created_at,
            entries,
        }
    }

    /// Parse a serialized snapshot, rejecting formats from the future.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        if snapshot.version > FORMAT_VERSION {
            return Err(HuginnError::Storage(format!(
                "snapshot '{}' has format version {}, newest supported is {}",
                snapshot.name, snapshot.version, FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            name: self.name.clone(),
            created_at: self.created_at,
            entries: self.entries.len(),
        }
    }
}

/// Listing line for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub entries: usize,
}

/// Snapshot names become file names: `[A-Za-z0-9_.-]`, not starting with a dot.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(HuginnError::InvalidInput(format!(
            "invalid snapshot name '{name}': use letters, digits, '_', '-' or '.'"
        )))
    }
}
