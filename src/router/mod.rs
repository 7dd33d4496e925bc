//! Failover router: cache first, then credentials in priority order.
//!
//! # Resolution flow
//!
//! ```text
//!   resolve(request)
//!        │ derive cache key ──────────────► MalformedRequest
//!        ▼
//!   ┌──────────┐  usable entry
//!   │  cache   │ ─────────────────────────► Resolution { source: cache }
//!   └────┬─────┘
//!        │ miss
//!        ▼
//!   for credential in candidates(op):      (priority order, stable)
//!        ├─ deadline passed ──────────────► DeadlineExceeded
//!        ├─ cooling down ── skip, note reason
//!        ├─ invoke (per-attempt timeout, optional retries)
//!        │    ├─ ok ── record success, cache as pending ──► Resolution
//!        │    ├─ fatal ───────────────────► that error, health untouched
//!        │    └─ transient ── record failure, note reason, next
//!        ▼
//!   AllProvidersExhausted { failures }
//! ```
//!
//! Candidates are tried one at a time; a request never fans out. Dropping
//! the returned future cancels the attempt in flight without counting it
//! as a provider failure.

mod builder;
mod config;

pub use builder::RouterBuilder;
pub use config::RouterConfig;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheEditor, CacheStore};
use crate::error::AttemptFailure;
use crate::health::{Admission, HealthTracker};
use crate::providers::retry::with_retry;
use crate::providers::{CredentialId, CredentialRegistry, ProviderCredential, RetryConfig};
use crate::telemetry;
use crate::types::{ProviderResponse, Request, Resolution, Source, Usage};
use crate::{HuginnError, Result};

/// Per-call options for [`FailoverRouter::resolve_with()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Overall budget for this resolution.
    pub deadline: Option<Duration>,
    /// Overrides [`RouterConfig::trust_pending_results`] for this call.
    pub trust_pending: Option<bool>,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn trust_pending(mut self, trust: bool) -> Self {
        self.trust_pending = Some(trust);
        self
    }
}

/// Resolves requests against the cache and a priority-ordered credential list.
///
/// Cheap to share behind an `Arc`; concurrent resolutions only contend on
/// the cache key or credential they touch.
#[derive(Debug)]
pub struct FailoverRouter {
    registry: CredentialRegistry,
    cache: Arc<CacheStore>,
    health: Arc<HealthTracker>,
    retry: RetryConfig,
    config: RouterConfig,
}

impl FailoverRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Review handle over this router's cache.
    pub fn editor(&self) -> CacheEditor {
        CacheEditor::new(Arc::clone(&self.cache))
    }

    /// Resolve with the configured defaults and no deadline.
    pub async fn resolve(&self, request: &Request) -> Result<Resolution> {
        self.resolve_with(request, ResolveOptions::default()).await
    }

    /// Resolve a request.
    ///
    /// Returns the payload with its source, or exactly one error:
    /// [`HuginnError::MalformedRequest`], a fatal provider error,
    /// [`HuginnError::AllProvidersExhausted`] or
    /// [`HuginnError::DeadlineExceeded`].
    #[instrument(skip(self, request, options), fields(operation = %request.operation()))]
    pub async fn resolve_with(
        &self,
        request: &Request,
        options: ResolveOptions,
    ) -> Result<Resolution> {
        let start = Instant::now();
        let operation = request.operation().as_str();
        let key = request.cache_key()?;
        let trust_pending = options
            .trust_pending
            .unwrap_or(self.config.trust_pending_results);

        if let Some(entry) = self.cache.lookup(&key, trust_pending) {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "operation" => operation).increment(1);
            debug!(key = %key, state = %entry.state, "served from cache");
            return Ok(Resolution {
                payload: entry.served_payload().clone(),
                source: Source::Cache { state: entry.state },
                key,
            });
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "operation" => operation).increment(1);

        let deadline = options
            .deadline
            .and_then(|budget| start.checked_add(budget));
        // Same clock as the store's `created_at` stamps.
        let issued_at = self.cache.now();
        let mut failures = Vec::new();

        for credential in self.registry.candidates(request.operation()) {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Self::deadline_exceeded(operation, start, failures));
            }

            let id = credential.id();
            let admission = self.health.try_admit(id);
            if let Admission::CoolingDown { until } = admission {
                debug!(credential = %id, "skipping credential in cooldown");
                failures.push(AttemptFailure::cooling_down(id.clone(), until));
                continue;
            }
            let mut probe = ProbeGuard {
                health: &self.health,
                id,
                armed: admission == Admission::Probe,
            };

            let Some(outcome) = self.attempt(credential, request, deadline).await else {
                return Err(Self::deadline_exceeded(operation, start, failures));
            };

            match outcome.and_then(non_empty) {
                Ok(response) => {
                    probe.armed = false;
                    self.health.record_success(id);

                    let ProviderResponse { payload, usage, .. } = response;
                    if let Err(e) = self.cache.put_unless_superseded(
                        key.clone(),
                        payload.clone(),
                        id.clone(),
                        issued_at,
                        request.normalized_text(),
                    ) {
                        warn!(key = %key, credential = %id, error = %e, "failed to cache result");
                    }

                    Self::record_request(operation, id.as_str(), start, true);
                    if let Some(ref usage) = usage {
                        Self::record_token_usage(id, usage);
                    }
                    debug!(credential = %id, "resolved by provider");
                    return Ok(Resolution {
                        key,
                        payload,
                        source: Source::Provider {
                            credential: id.clone(),
                        },
                    });
                }
                Err(e) if e.is_fatal() => {
                    warn!(credential = %id, error = %e, "request rejected, aborting failover");
                    Self::record_request(operation, id.as_str(), start, false);
                    return Err(e);
                }
                Err(e) => {
                    probe.armed = false;
                    let record = self.health.record_failure(id, e.failure_kind());
                    warn!(
                        credential = %id,
                        failures = record.consecutive_failures,
                        error = %e,
                        "provider attempt failed, trying next credential"
                    );
                    failures.push(AttemptFailure::failed(id.clone(), &e));
                }
            }
        }

        warn!(candidates = failures.len(), "all providers exhausted");
        Self::record_request(operation, "none", start, false);
        Err(HuginnError::AllProvidersExhausted { failures })
    }

    /// One credential's turn: retries and per-attempt timeouts included.
    ///
    /// `None` means the overall deadline fired first.
    async fn attempt(
        &self,
        credential: &ProviderCredential,
        request: &Request,
        deadline: Option<Instant>,
    ) -> Option<Result<ProviderResponse>> {
        let timeout = credential
            .attempt_timeout()
            .unwrap_or_else(|| self.config.attempt_timeout());
        let call = with_retry(
            &self.retry,
            credential.id().as_str(),
            request.operation().as_str(),
            move || async move {
                tokio::time::timeout(timeout, credential.adapter().invoke(request))
                    .await
                    .unwrap_or_else(|_| Err(HuginnError::Timeout(timeout)))
            },
        );
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call).await.ok(),
            None => Some(call.await),
        }
    }

    fn deadline_exceeded(
        operation: &'static str,
        start: Instant,
        failures: Vec<AttemptFailure>,
    ) -> HuginnError {
        warn!(candidates = failures.len(), "deadline exceeded");
        Self::record_request(operation, "none", start, false);
        HuginnError::DeadlineExceeded { failures }
    }

    /// Record request outcome metrics (counter + histogram).
    fn record_request(operation: &'static str, credential: &str, start: Instant, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        let elapsed = start.elapsed().as_secs_f64();
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "credential" => credential.to_owned(),
            "operation" => operation,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "credential" => credential.to_owned(),
            "operation" => operation,
        )
        .record(elapsed);
    }

    /// Record token usage metrics from a provider response.
    fn record_token_usage(credential: &CredentialId, usage: &Usage) {
        metrics::counter!(telemetry::TOKENS_TOTAL,
            "credential" => credential.to_string(),
            "direction" => "prompt",
        )
        .increment(u64::from(usage.prompt_tokens));
        metrics::counter!(telemetry::TOKENS_TOTAL,
            "credential" => credential.to_string(),
            "direction" => "completion",
        )
        .increment(u64::from(usage.completion_tokens));
    }
}

/// An empty answer is a provider failure, not something to cache.
fn non_empty(response: ProviderResponse) -> Result<ProviderResponse> {
    if response.payload.is_empty() {
        Err(HuginnError::EmptyResponse)
    } else {
        Ok(response)
    }
}

/// Hands a half-open probe slot back if the attempt ends without an outcome
/// being recorded (cancellation, deadline, fatal error).
struct ProbeGuard<'a> {
    health: &'a HealthTracker,
    id: &'a CredentialId,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.health.release_probe(self.id);
        }
    }
}
