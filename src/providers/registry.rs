//! Credential registry with priority ordering.
//!
//! Each [`ProviderCredential`] binds one adapter instance (one API key) to a
//! stable id and a priority rank. The registry keeps credentials sorted by
//! rank once, at build time; selecting candidates for a request is a filter
//! over that order, so equal ranks keep their declaration order.
//!
//! # Candidate selection
//!
//! ```text
//! declared:  groq#1 (rank 0)  hf#1 (rank 0)  openrouter#1 (rank 1)
//! request:   op = complete
//!                     │
//!                     ▼
//!         ┌─────────────────────┐
//!         │  CredentialRegistry │ ── stable sort by rank
//!         └─────────┬───────────┘
//!                   │ filter: adapter.supports(op)
//!                   ▼
//!     [groq#1, openrouter#1]   (hf#1 only does image_generation)
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::routing::apply_priority_order;
use super::traits::ProviderAdapter;
use crate::types::OperationKind;
use crate::{HuginnError, Result};

/// Identity of one credential, e.g. `"groq#2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CredentialId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CredentialId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One authenticated identity for a provider, individually health-tracked.
#[derive(Clone)]
pub struct ProviderCredential {
    id: CredentialId,
    priority: u32,
    timeout: Option<Duration>,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderCredential {
    /// Create a credential with priority 0 (tried first, ties keep
    /// declaration order).
    pub fn new(id: impl Into<CredentialId>, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            timeout: None,
            adapter,
        }
    }

    /// Set the priority rank (lower = tried first).
    pub fn priority(mut self, rank: u32) -> Self {
        self.priority = rank;
        self
    }

    /// Override the router's per-attempt timeout for this credential.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &CredentialId {
        &self.id
    }

    pub fn rank(&self) -> u32 {
        self.priority
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    /// Provider name of the underlying adapter.
    pub fn provider(&self) -> &str {
        self.adapter.name()
    }

    pub fn supports(&self, operation: OperationKind) -> bool {
        self.adapter.supports(operation)
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("id", &self.id)
            .field("provider", &self.adapter.name())
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registered credentials in priority order.
#[derive(Debug, Default, Clone)]
pub struct CredentialRegistry {
    credentials: Vec<ProviderCredential>,
}

impl CredentialRegistry {
    /// Build the registry from declared credentials.
    ///
    /// `priority_order` (may be empty) lists credential ids in the order they
    /// should be tried; it overrides declared ranks for the ids it names, and
    /// unlisted credentials follow by declared rank. Fails on duplicate ids or
    /// on an order entry naming an unknown credential.
    pub fn new(credentials: Vec<ProviderCredential>, priority_order: &[String]) -> Result<Self> {
        let mut seen = HashSet::new();
        for credential in &credentials {
            if !seen.insert(credential.id.as_str()) {
                return Err(HuginnError::Configuration(format!(
                    "duplicate credential id '{}'",
                    credential.id
                )));
            }
        }
        if let Some(unknown) = priority_order.iter().find(|id| !seen.contains(id.as_str())) {
            return Err(HuginnError::Configuration(format!(
                "provider priority order names unknown credential '{unknown}'"
            )));
        }

        let mut credentials = credentials;
        apply_priority_order(&mut credentials, priority_order);
        Ok(Self { credentials })
    }

    /// Credentials able to serve `operation`, in the order they should be tried.
    pub fn candidates(&self, operation: OperationKind) -> impl Iterator<Item = &ProviderCredential> {
        self.credentials
            .iter()
            .filter(move |credential| credential.supports(operation))
    }

    pub fn get(&self, id: &CredentialId) -> Option<&ProviderCredential> {
        self.credentials.iter().find(|c| &c.id == id)
    }

    /// All credential ids in priority order.
    pub fn ids(&self) -> Vec<CredentialId> {
        self.credentials.iter().map(|c| c.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
