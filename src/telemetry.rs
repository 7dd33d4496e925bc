//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `credential`: credential id (e.g. "groq#1")
//! - `operation`: operation kind (e.g. "complete", "image_generation")
//! - `status`: "ok" or "error"
//! - `direction`: "prompt" or "completion"

/// Total resolutions that reached the provider stage.
///
/// Labels: `credential` ("none" when no candidate answered), `operation`,
/// `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Resolution duration in seconds, cache lookup included.
///
/// Labels: `credential`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "huginn_request_duration_seconds";

/// Total retry attempts on the same credential (not counting the first call).
///
/// Labels: `credential`, `operation`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Total tokens consumed.
///
/// Labels: `credential`, `direction` ("prompt" | "completion").
pub const TOKENS_TOTAL: &str = "huginn_tokens_total";

/// Total lookups served from the cache.
///
/// Labels: `operation`.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total lookups that fell through to providers.
///
/// Labels: `operation`.
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Total failed provider attempts recorded against credential health.
///
/// Labels: `credential`, `kind` (e.g. "timeout", "rate_limited").
pub const PROVIDER_FAILURES_TOTAL: &str = "huginn_provider_failures_total";

/// Total cooldowns started or extended.
///
/// Labels: `credential`.
pub const COOLDOWNS_TOTAL: &str = "huginn_cooldowns_total";

/// Total review transitions applied to cache entries.
///
/// Labels: `from`, `to` (entry states).
pub const CACHE_TRANSITIONS_TOTAL: &str = "huginn_cache_transitions_total";
