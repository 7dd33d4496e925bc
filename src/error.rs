//! Huginn error types

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::EntryState;
use crate::providers::CredentialId;
use crate::types::CacheKey;

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Caller errors
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    // Provider/network errors (transient for failover)
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("empty response from provider")]
    EmptyResponse,

    // Provider errors that no other candidate can fix
    #[error("provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("payload too large for provider")]
    PayloadTooLarge,

    // Router outcomes
    #[error("all providers exhausted ({} candidates)", .failures.len())]
    AllProvidersExhausted { failures: Vec<AttemptFailure> },

    #[error("deadline exceeded after {} failed candidates", .failures.len())]
    DeadlineExceeded { failures: Vec<AttemptFailure> },

    // Cache state machine
    #[error("invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: CacheKey,
        from: EntryState,
        to: EntryState,
    },

    #[error("cache entry not found: {0}")]
    EntryNotFound(CacheKey),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    // Data errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HuginnError {
    /// Whether retrying the same credential could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            HuginnError::Http(_)
            | HuginnError::RateLimited { .. }
            | HuginnError::Timeout(_)
            | HuginnError::EmptyResponse => true,
            HuginnError::Api { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Whether the error aborts failover: no other candidate would do better.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HuginnError::MalformedRequest(_)
                | HuginnError::ProviderRejected(_)
                | HuginnError::PayloadTooLarge
        )
    }

    /// Provider-supplied backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HuginnError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Health-record classification of a failed attempt.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            HuginnError::Timeout(_) => FailureKind::Timeout,
            HuginnError::RateLimited { .. } => FailureKind::RateLimited,
            HuginnError::Api { status, .. } if *status >= 500 => FailureKind::ServerError,
            HuginnError::Http(_) => FailureKind::Network,
            HuginnError::AuthenticationFailed => FailureKind::Authentication,
            HuginnError::EmptyResponse => FailureKind::EmptyResponse,
            _ => FailureKind::Other,
        }
    }

    /// Per-candidate diagnostics carried by the aggregate router errors.
    pub fn failures(&self) -> &[AttemptFailure] {
        match self {
            HuginnError::AllProvidersExhausted { failures }
            | HuginnError::DeadlineExceeded { failures } => failures,
            _ => &[],
        }
    }
}

/// Classification of a failed provider attempt, stored in health records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    ServerError,
    Network,
    Authentication,
    EmptyResponse,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ServerError => "server_error",
            FailureKind::Network => "network",
            FailureKind::Authentication => "authentication",
            FailureKind::EmptyResponse => "empty_response",
            FailureKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Why a single candidate did not produce a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Skipped because the credential was cooling down.
    CoolingDown { until: Option<DateTime<Utc>> },
    /// Attempted and failed with a transient error.
    Failed { kind: FailureKind, message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::CoolingDown { until: Some(until) } => {
                write!(f, "cooling down until {}", until.to_rfc3339())
            }
            FailureReason::CoolingDown { until: None } => f.write_str("probe in flight"),
            FailureReason::Failed { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

/// One `{credential, reason}` pair in an exhaustion or deadline error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub credential: CredentialId,
    #[serde(flatten)]
    pub reason: FailureReason,
}

impl AttemptFailure {
    pub(crate) fn cooling_down(credential: CredentialId, until: Option<DateTime<Utc>>) -> Self {
        Self {
            credential,
            reason: FailureReason::CoolingDown { until },
        }
    }

    pub(crate) fn failed(credential: CredentialId, err: &HuginnError) -> Self {
        Self {
            credential,
            reason: FailureReason::Failed {
                kind: err.failure_kind(),
                message: err.to_string(),
            },
        }
    }

    /// Whether the candidate was skipped without being called.
    pub fn was_skipped(&self) -> bool {
        matches!(self.reason, FailureReason::CoolingDown { .. })
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.credential, self.reason)
    }
}

/// Keywords providers use for quota exhaustion in error bodies.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "resource_exhausted",
    "limit exceeded",
];

/// Whether an error message describes a rate limit, whatever its status code.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;
