//! Health tracker: failure counting, cooldown windows and probe admission.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use huginn::health::Admission;
use huginn::{Clock, CredentialId, FailureKind, HealthConfig, HealthTracker, ManualClock};

fn tracker(threshold: u32) -> (HealthTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let config = HealthConfig {
        max_consecutive_failures: threshold,
        ..HealthConfig::default()
    };
    (HealthTracker::with_clock(config, clock.clone()), clock)
}

#[test]
fn failures_below_threshold_keep_credential_healthy() {
    let (tracker, _clock) = tracker(3);
    let id = CredentialId::from("groq#1");

    tracker.record_failure(&id, FailureKind::Timeout);
    let record = tracker.record_failure(&id, FailureKind::ServerError);

    assert_eq!(record.consecutive_failures, 2);
    assert_eq!(record.cooldown_until, None);
    assert_eq!(record.last_error, Some(FailureKind::ServerError));
    assert!(tracker.is_healthy(&id));
    assert_eq!(tracker.try_admit(&id), Admission::Healthy);
}

#[test]
fn reaching_threshold_starts_cooldown() {
    let (tracker, clock) = tracker(3);
    let id = CredentialId::from("groq#1");

    for _ in 0..3 {
        tracker.record_failure(&id, FailureKind::RateLimited);
    }

    let record = tracker.record(&id).unwrap();
    assert_eq!(
        record.cooldown_until,
        Some(clock.now() + chrono::Duration::seconds(30))
    );
    assert!(!tracker.is_healthy(&id));
    assert_eq!(
        tracker.try_admit(&id),
        Admission::CoolingDown {
            until: record.cooldown_until
        }
    );
}

#[test]
fn cooldown_doubles_and_caps() {
    let (tracker, clock) = tracker(1);
    let id = CredentialId::from("openrouter#1");

    let mut lengths = Vec::new();
    for _ in 0..7 {
        let record = tracker.record_failure(&id, FailureKind::ServerError);
        let until = record.cooldown_until.unwrap();
        lengths.push((until - clock.now()).num_seconds());
    }
    assert_eq!(lengths, vec![30, 60, 120, 240, 480, 600, 600]);
}

#[test]
fn success_resets_everything() {
    let (tracker, _clock) = tracker(1);
    let id = CredentialId::from("mistral#1");

    tracker.record_failure(&id, FailureKind::Network);
    assert!(!tracker.is_healthy(&id));

    tracker.record_success(&id);
    let record = tracker.record(&id).unwrap();
    assert_eq!(record.consecutive_failures, 0);
    assert_eq!(record.cooldown_until, None);
    assert!(tracker.is_healthy(&id));
}

#[test]
fn elapsed_cooldown_admits_a_single_probe() {
    let (tracker, clock) = tracker(1);
    let id = CredentialId::from("groq#2");

    tracker.record_failure(&id, FailureKind::Timeout);
    clock.advance(Duration::from_secs(30));

    assert!(tracker.is_healthy(&id));
    assert_eq!(tracker.try_admit(&id), Admission::Probe);
    assert!(tracker.record(&id).unwrap().probe_in_flight());
    assert_eq!(
        tracker.try_admit(&id),
        Admission::CoolingDown { until: None }
    );

    tracker.release_probe(&id);
    assert_eq!(tracker.try_admit(&id), Admission::Probe);

    tracker.record_success(&id);
    assert_eq!(tracker.try_admit(&id), Admission::Healthy);
    assert!(!tracker.record(&id).unwrap().probe_in_flight());
}

#[test]
fn failed_probe_clears_probe_slot() {
    let (tracker, clock) = tracker(1);
    let id = CredentialId::from("groq#3");

    tracker.record_failure(&id, FailureKind::Timeout);
    clock.advance(Duration::from_secs(30));
    assert_eq!(tracker.try_admit(&id), Admission::Probe);

    let record = tracker.record_failure(&id, FailureKind::Timeout);
    assert!(!record.probe_in_flight());
    assert_eq!(record.consecutive_failures, 2);
    assert!(matches!(
        tracker.try_admit(&id),
        Admission::CoolingDown { until: Some(_) }
    ));
}

#[test]
fn credentials_are_tracked_independently() {
    let (tracker, _clock) = tracker(1);
    let a = CredentialId::from("groq#1");
    let b = CredentialId::from("groq#2");

    tracker.record_failure(&a, FailureKind::Authentication);
    tracker.record_success(&b);

    assert!(!tracker.is_healthy(&a));
    assert!(tracker.is_healthy(&b));

    let ids: Vec<_> = tracker.records().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![a, b]);
}

#[test]
fn concurrent_failures_are_all_counted() {
    let (tracker, _clock) = tracker(1000);
    let tracker = Arc::new(tracker);
    let id = CredentialId::from("shared");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    tracker.record_failure(&id, FailureKind::Network);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(tracker.record(&id).unwrap().consecutive_failures, 400);
}

#[test]
fn record_serializes_without_probe_flag() {
    let (tracker, _clock) = tracker(1);
    let id = CredentialId::from("groq#1");
    let record = tracker.record_failure(&id, FailureKind::RateLimited);

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["consecutive_failures"], 1);
    assert_eq!(json["last_error"], "rate_limited");
    assert!(json.get("probe_in_flight").is_none());
}
