//! Reviewed response cache.
//!
//! Provider answers are stored as [`CacheEntry`] values under their request's
//! [`CacheKey`]. A fresh answer always lands as [`EntryState::Pending`]; only
//! an explicit review moves it on:
//!
//! ```text
//!             accept            reject
//!   pending ─────────► accepted ───────► rejected
//!      │                                    ▲
//!      ├──────────────── reject ────────────┘
//!      │
//!      └── edit(payload) ──► edited
//! ```
//!
//! Accepted and edited entries are served; pending entries only when the
//! caller trusts them; rejected entries never (they stay for audit until the
//! next provider answer overwrites them).
//!
//! - [`CacheStore`] owns the entries: per-key locking, persistence through a
//!   [`CacheBackend`], snapshots.
//! - [`CacheEditor`] is the review surface used by people or policies.

pub mod backend;
pub mod editor;
pub mod snapshot;
pub mod store;

pub use backend::{CacheBackend, EphemeralBackend, FileBackend};
pub use editor::CacheEditor;
pub use snapshot::{FORMAT_VERSION, Snapshot, SnapshotInfo};
pub use store::{CacheStats, CacheStore, ClearScope};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::CredentialId;
use crate::types::{CacheKey, ResponsePayload};
use crate::{HuginnError, Result};

/// Review state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Pending,
    Accepted,
    Rejected,
    Edited,
}

impl EntryState {
    pub const ALL: [EntryState; 4] = [
        EntryState::Pending,
        EntryState::Accepted,
        EntryState::Rejected,
        EntryState::Edited,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Accepted => "accepted",
            EntryState::Rejected => "rejected",
            EntryState::Edited => "edited",
        }
    }

    /// Whether a review may move an entry from `self` to `to`.
    ///
    /// Going back to pending is never a review action; it only happens when
    /// a new provider answer is stored.
    pub fn can_transition_to(self, to: EntryState) -> bool {
        matches!(
            (self, to),
            (EntryState::Pending, EntryState::Accepted)
                | (EntryState::Pending, EntryState::Rejected)
                | (EntryState::Pending, EntryState::Edited)
                | (EntryState::Accepted, EntryState::Rejected)
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = HuginnError;

    fn from_str(s: &str) -> Result<Self> {
        EntryState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HuginnError::InvalidInput(format!("unknown entry state '{s}'")))
    }
}

/// One memoized provider answer.
///
/// Serialized with camelCase field names, one JSON record per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: ResponsePayload,
    pub provider_id: CredentialId,
    pub created_at: DateTime<Utc>,
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_payload: Option<ResponsePayload>,
    /// Normalized prompt text, shown to reviewers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// A new pending entry.
    pub fn pending(
        key: CacheKey,
        payload: ResponsePayload,
        provider_id: CredentialId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            payload,
            provider_id,
            created_at,
            state: EntryState::Pending,
            edited_payload: None,
            prompt: None,
            hit_count: 0,
            last_accessed: None,
        }
    }

    /// The payload a lookup hands out: the edit for edited entries.
    pub fn served_payload(&self) -> &ResponsePayload {
        match (&self.state, &self.edited_payload) {
            (EntryState::Edited, Some(edited)) => edited,
            _ => &self.payload,
        }
    }

    /// Whether a lookup may serve this entry.
    pub fn is_usable(&self, trust_pending: bool) -> bool {
        match self.state {
            EntryState::Accepted | EntryState::Edited => true,
            EntryState::Pending => trust_pending,
            EntryState::Rejected => false,
        }
    }

    /// Last time the entry was served, or its creation time if never.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }
}
