//! Per-credential health tracking with exponential cooldown.
//!
//! Each credential owns a [`HealthRecord`] behind its own mutex, so updates
//! for one credential are serialized without blocking the others. The outer
//! map lock is only held long enough to find or insert a record.
//!
//! # State machine
//!
//! ```text
//!            failure (count < max)
//!          ┌──────────────┐
//!          ▼              │
//!     ┌─────────┐  count reaches max   ┌──────────────┐
//!     │ healthy │ ───────────────────► │ cooling down │
//!     └─────────┘                      └──────┬───────┘
//!          ▲                                  │ cooldown elapses
//!          │ success        ┌─────────┐       ▼
//!          └─────────────── │  probe  │ ◄── one request admitted
//!                           └────┬────┘
//!                                │ failure: longer cooldown
//!                                ▼
//!                          cooling down
//! ```
//!
//! Cooldowns double with each failure past the threshold: with the defaults
//! (3 failures, 30s base, 10 min cap) the sequence is 30s, 60s, 120s, ...,
//! 600s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{self, Clock, SystemClock};
use crate::error::FailureKind;
use crate::providers::CredentialId;
use crate::telemetry;

/// Cooldown policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive failures before a credential starts cooling down.
    pub max_consecutive_failures: u32,
    /// First cooldown length.
    pub cooldown_base: Duration,
    /// Upper bound on any cooldown.
    pub cooldown_cap: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown_base: Duration::from_secs(30),
            cooldown_cap: Duration::from_secs(600),
        }
    }
}

impl HealthConfig {
    /// Cooldown owed after `consecutive_failures`, or `None` below the threshold.
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Option<Duration> {
        let threshold = self.max_consecutive_failures.max(1);
        if consecutive_failures < threshold {
            return None;
        }
        let exponent = (consecutive_failures - threshold).min(31);
        let cooldown = self
            .cooldown_base
            .saturating_mul(2u32.saturating_pow(exponent));
        Some(cooldown.min(self.cooldown_cap))
    }
}

/// Health of one credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_error: Option<FailureKind>,
    #[serde(skip)]
    probe_in_flight: bool,
}

impl HealthRecord {
    /// Whether the credential may be tried at `now` (ignores probe admission).
    pub fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_none_or(|until| now >= until)
    }

    /// Whether a half-open probe is currently running.
    pub fn probe_in_flight(&self) -> bool {
        self.probe_in_flight
    }
}

/// Outcome of asking whether a request may use a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Not cooling down; try it.
    Healthy,
    /// Cooldown elapsed and this request holds the single probe slot. The
    /// caller must report the outcome or call [`HealthTracker::release_probe()`].
    Probe,
    /// Skip it. `until` is `None` while another request is probing.
    CoolingDown { until: Option<DateTime<Utc>> },
}

/// Owner of every credential's [`HealthRecord`].
#[derive(Debug)]
pub struct HealthTracker {
    records: RwLock<HashMap<CredentialId, Arc<Mutex<HealthRecord>>>>,
    config: HealthConfig,
    clock: Arc<dyn Clock>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl HealthTracker {
    /// Create a tracker on the system clock.
    pub fn new(config: HealthConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a tracker on an injected clock.
    pub fn with_clock(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn slot(&self, id: &CredentialId) -> Arc<Mutex<HealthRecord>> {
        if let Some(slot) = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            return Arc::clone(slot);
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        // Double-check after acquiring write lock
        Arc::clone(records.entry(id.clone()).or_default())
    }

    fn existing(&self, id: &CredentialId) -> Option<Arc<Mutex<HealthRecord>>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Whether the credential is outside any cooldown.
    pub fn is_healthy(&self, id: &CredentialId) -> bool {
        let now = self.clock.now();
        self.existing(id).is_none_or(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_healthy_at(now)
        })
    }

    /// Decide whether a request may call the credential now.
    ///
    /// After a cooldown elapses only one caller gets [`Admission::Probe`];
    /// the rest are told to skip until that probe reports.
    pub fn try_admit(&self, id: &CredentialId) -> Admission {
        let Some(slot) = self.existing(id) else {
            return Admission::Healthy;
        };
        let now = self.clock.now();
        let mut record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match record.cooldown_until {
            None => Admission::Healthy,
            Some(until) if now < until => Admission::CoolingDown { until: Some(until) },
            Some(_) if record.probe_in_flight => Admission::CoolingDown { until: None },
            Some(_) => {
                record.probe_in_flight = true;
                debug!(credential = %id, "cooldown elapsed, admitting probe");
                Admission::Probe
            }
        }
    }

    /// Give back a probe slot without recording an outcome (cancelled call).
    pub fn release_probe(&self, id: &CredentialId) {
        if let Some(slot) = self.existing(id) {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .probe_in_flight = false;
        }
    }

    /// Clear failures and cooldown.
    pub fn record_success(&self, id: &CredentialId) {
        let slot = self.slot(id);
        let mut record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if record.consecutive_failures > 0 || record.cooldown_until.is_some() {
            debug!(credential = %id, "credential recovered");
        }
        record.consecutive_failures = 0;
        record.cooldown_until = None;
        record.probe_in_flight = false;
    }

    /// Count a failure; start or extend the cooldown once the threshold is hit.
    ///
    /// Returns the updated record.
    pub fn record_failure(&self, id: &CredentialId, kind: FailureKind) -> HealthRecord {
        let now = self.clock.now();
        let slot = self.slot(id);
        let mut record = slot.lock().unwrap_or_else(PoisonError::into_inner);
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_error = Some(kind);
        record.probe_in_flight = false;

        metrics::counter!(telemetry::PROVIDER_FAILURES_TOTAL,
            "credential" => id.to_string(),
            "kind" => kind.to_string(),
        )
        .increment(1);

        if let Some(cooldown) = self.config.cooldown_for(record.consecutive_failures) {
            let until = clock::offset(now, cooldown);
            record.cooldown_until = Some(until);
            metrics::counter!(telemetry::COOLDOWNS_TOTAL, "credential" => id.to_string())
                .increment(1);
            warn!(
                credential = %id,
                failures = record.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "credential cooling down"
            );
        }
        record.clone()
    }

    /// Snapshot of one credential's record, if it has ever been touched.
    pub fn record(&self, id: &CredentialId) -> Option<HealthRecord> {
        self.existing(id)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Snapshot of every record, sorted by credential id.
    pub fn records(&self) -> Vec<(CredentialId, HealthRecord)> {
        let slots: Vec<_> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        let mut records: Vec<_> = slots
            .into_iter()
            .map(|(id, slot)| {
                let record = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
                (id, record)
            })
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_grows_then_caps() {
        let config = HealthConfig::default();
        assert_eq!(config.cooldown_for(2), None);
        assert_eq!(config.cooldown_for(3), Some(Duration::from_secs(30)));
        assert_eq!(config.cooldown_for(4), Some(Duration::from_secs(60)));
        assert_eq!(config.cooldown_for(5), Some(Duration::from_secs(120)));
        assert_eq!(config.cooldown_for(9), Some(Duration::from_secs(600)));
        assert_eq!(config.cooldown_for(u32::MAX), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_threshold_behaves_like_one() {
        let config = HealthConfig {
            max_consecutive_failures: 0,
            ..HealthConfig::default()
        };
        assert_eq!(config.cooldown_for(1), Some(Duration::from_secs(30)));
    }

    #[test]
    fn unknown_credential_is_healthy() {
        let tracker = HealthTracker::default();
        let id = CredentialId::from("nobody");
        assert!(tracker.is_healthy(&id));
        assert_eq!(tracker.try_admit(&id), Admission::Healthy);
        assert!(tracker.record(&id).is_none());
    }
}
