//! Router options.

use std::time::Duration;

use serde::Deserialize;

use crate::health::HealthConfig;

/// Router configuration.
///
/// Keys are snake_case; the camelCase spellings (`trustPendingResults`, ...)
/// are accepted as aliases.
///
/// ```rust
/// # use huginn::RouterConfig;
/// # use std::time::Duration;
/// let config = RouterConfig::default()
///     .trust_pending_results(true)
///     .per_attempt_timeout(Duration::from_secs(5));
/// assert_eq!(config.max_consecutive_failures, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterConfig {
    /// Serve pending (unreviewed) cache entries (default: false).
    #[serde(default, alias = "trustPendingResults")]
    pub trust_pending_results: bool,
    /// Consecutive failures before a credential cools down (default: 3).
    #[serde(
        default = "default_max_consecutive_failures",
        alias = "maxConsecutiveFailures"
    )]
    pub max_consecutive_failures: u32,
    /// First cooldown, in seconds (default: 30).
    #[serde(default = "default_cooldown_base", alias = "cooldownBaseSeconds")]
    pub cooldown_base_seconds: u64,
    /// Longest cooldown, in seconds (default: 600).
    #[serde(default = "default_cooldown_cap", alias = "cooldownCapSeconds")]
    pub cooldown_cap_seconds: u64,
    /// Per-attempt timeout unless a credential overrides it (default: 15).
    #[serde(
        default = "default_per_attempt_timeout",
        alias = "perAttemptTimeoutSeconds"
    )]
    pub per_attempt_timeout_seconds: u64,
    /// Credential ids to try first, in order. Unlisted credentials follow by
    /// declared priority.
    #[serde(default, alias = "providerPriorityOrder")]
    pub provider_priority_order: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            trust_pending_results: false,
            max_consecutive_failures: default_max_consecutive_failures(),
            cooldown_base_seconds: default_cooldown_base(),
            cooldown_cap_seconds: default_cooldown_cap(),
            per_attempt_timeout_seconds: default_per_attempt_timeout(),
            provider_priority_order: Vec::new(),
        }
    }
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_cooldown_base() -> u64 {
    30
}

fn default_cooldown_cap() -> u64 {
    600
}

fn default_per_attempt_timeout() -> u64 {
    15
}

impl RouterConfig {
    pub fn trust_pending_results(mut self, trust: bool) -> Self {
        self.trust_pending_results = trust;
        self
    }

    pub fn max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n;
        self
    }

    pub fn cooldown_base(mut self, base: Duration) -> Self {
        self.cooldown_base_seconds = base.as_secs();
        self
    }

    pub fn cooldown_cap(mut self, cap: Duration) -> Self {
        self.cooldown_cap_seconds = cap.as_secs();
        self
    }

    pub fn per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout_seconds = timeout.as_secs();
        self
    }

    pub fn provider_priority_order<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provider_priority_order = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.per_attempt_timeout_seconds)
    }

    /// The cooldown policy these options describe.
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            cooldown_base: Duration::from_secs(self.cooldown_base_seconds),
            cooldown_cap: Duration::from_secs(self.cooldown_cap_seconds),
        }
    }
}
