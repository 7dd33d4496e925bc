//! Builder for configuring router instances

use std::sync::Arc;

use tracing::warn;

use super::{FailoverRouter, RouterConfig};
use crate::Result;
use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::health::HealthTracker;
use crate::providers::{CredentialRegistry, ProviderCredential, RetryConfig};

/// Builder for [`FailoverRouter`].
///
/// Anything not supplied gets a default: the system clock, an in-memory
/// cache, and a health tracker using the config's cooldown policy.
#[derive(Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    retry: RetryConfig,
    credentials: Vec<ProviderCredential>,
    cache: Option<Arc<CacheStore>>,
    health: Option<Arc<HealthTracker>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable retries on the same credential before failing over.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Register one credential. Declaration order breaks priority ties.
    pub fn credential(mut self, credential: ProviderCredential) -> Self {
        self.credentials.push(credential);
        self
    }

    pub fn credentials(mut self, credentials: impl IntoIterator<Item = ProviderCredential>) -> Self {
        self.credentials.extend(credentials);
        self
    }

    /// Share an existing cache store (e.g. one also handed to a review UI).
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share an existing health tracker. Its own cooldown policy applies.
    pub fn health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = Some(health);
        self
    }

    /// Inject a clock for the default cache and health tracker.
    ///
    /// A shared [`cache()`](Self::cache) or [`health()`](Self::health) keeps
    /// its own clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the router.
    ///
    /// Fails on duplicate credential ids or a priority order naming an
    /// unknown credential.
    pub fn build(self) -> Result<FailoverRouter> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let registry = CredentialRegistry::new(self.credentials, &self.config.provider_priority_order)?;
        if registry.is_empty() {
            warn!("router built without credentials; every cache miss will be exhausted");
        }

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheStore::in_memory_with_clock(Arc::clone(&clock))));
        let health = self.health.unwrap_or_else(|| {
            Arc::new(HealthTracker::with_clock(
                self.config.health_config(),
                Arc::clone(&clock),
            ))
        });

        Ok(FailoverRouter {
            registry,
            cache,
            health,
            retry: self.retry,
            config: self.config,
        })
    }
}
