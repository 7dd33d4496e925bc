//! Provider output and resolution types

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CacheKey;
use crate::cache::EntryState;
use crate::providers::CredentialId;

/// Normalized provider output, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResponsePayload {
    Text(String),
    Binary(#[serde(with = "super::base64_bytes")] Vec<u8>),
}

impl ResponsePayload {
    pub fn text(text: impl Into<String>) -> Self {
        ResponsePayload::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponsePayload::Text(s) => Some(s),
            ResponsePayload::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponsePayload::Text(s) => s.as_bytes(),
            ResponsePayload::Binary(b) => b,
        }
    }

    /// Blank text or zero bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            ResponsePayload::Text(s) => s.trim().is_empty(),
            ResponsePayload::Binary(b) => b.is_empty(),
        }
    }
}

impl From<&str> for ResponsePayload {
    fn from(text: &str) -> Self {
        ResponsePayload::Text(text.to_owned())
    }
}

impl From<String> for ResponsePayload {
    fn from(text: String) -> Self {
        ResponsePayload::Text(text)
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// What a provider adapter returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub payload: ResponsePayload,
    /// Model that actually served the request, when reported.
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

impl ProviderResponse {
    pub fn new(payload: impl Into<ResponsePayload>) -> Self {
        Self {
            payload: payload.into(),
            model: None,
            usage: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Where a resolved payload came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    /// Served from the cache; `state` tells accepted and edited entries apart.
    Cache { state: EntryState },
    /// Fresh answer from the named credential.
    Provider { credential: CredentialId },
}

impl Source {
    pub fn is_cache(&self) -> bool {
        matches!(self, Source::Cache { .. })
    }

    /// The credential that answered, for fresh results.
    pub fn credential(&self) -> Option<&CredentialId> {
        match self {
            Source::Provider { credential } => Some(credential),
            Source::Cache { .. } => None,
        }
    }
}

/// `cache` or `provider:<id>`.
impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Cache { .. } => f.write_str("cache"),
            Source::Provider { credential } => write!(f, "provider:{credential}"),
        }
    }
}

/// Successful outcome of [`FailoverRouter::resolve`](crate::FailoverRouter::resolve).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub key: CacheKey,
    pub payload: ResponsePayload,
    pub source: Source,
}
