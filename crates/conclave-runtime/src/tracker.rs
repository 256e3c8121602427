//! Per-provider performance accounting.
//!
//! The tracker is a process-wide collaborator owned alongside the
//! orchestrator and passed explicitly; only the orchestrator writes to it,
//! after consensus. Reads hand out fresh snapshots with the derived
//! analytics computed at read time.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Raw accumulators for one provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceRecord {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub total_score: f64,
    pub total_tokens: u64,
    pub wins: u64,
}

/// Snapshot of one provider's record plus derived analytics.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAnalytics {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub wins: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub average_score: f64,
    pub win_rate: f64,
    pub average_tokens: f64,
}

impl ProviderAnalytics {
    fn from_record(record: &PerformanceRecord) -> Self {
        let ratio = |numerator: f64, denominator: u64| {
            if denominator == 0 {
                0.0
            } else {
                numerator / denominator as f64
            }
        };
        Self {
            total_requests: record.total_requests,
            successes: record.successes,
            failures: record.failures,
            wins: record.wins,
            success_rate: ratio(record.successes as f64, record.total_requests),
            average_latency_ms: ratio(record.total_latency_ms as f64, record.successes),
            average_score: ratio(record.total_score, record.successes),
            win_rate: ratio(record.wins as f64, record.total_requests),
            average_tokens: ratio(record.total_tokens as f64, record.successes),
        }
    }
}

/// Thread-safe per-provider counters.
///
/// The outer map is read-locked for lookups; each record carries its own
/// lock so concurrent updates to different providers never contend.
#[derive(Default)]
pub struct PerformanceTracker {
    records: RwLock<HashMap<String, Arc<Mutex<PerformanceRecord>>>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_for(&self, provider: &str) -> Arc<Mutex<PerformanceRecord>> {
        if let Some(record) = self.records.read().get(provider) {
            return Arc::clone(record);
        }
        Arc::clone(
            self.records
                .write()
                .entry(provider.to_string())
                .or_default(),
        )
    }

    /// Record a scored, successful reply.
    pub fn record_success(
        &self,
        provider: &str,
        latency: Duration,
        score: f64,
        tokens: u32,
        won: bool,
    ) {
        let record = self.record_for(provider);
        let mut record = record.lock();
        record.total_requests += 1;
        record.successes += 1;
        record.total_latency_ms += latency.as_millis() as u64;
        record.total_score += score;
        record.total_tokens += u64::from(tokens);
        if won {
            record.wins += 1;
        }
    }

    /// Record a failed provider call.
    pub fn record_failure(&self, provider: &str) {
        let record = self.record_for(provider);
        let mut record = record.lock();
        record.total_requests += 1;
        record.failures += 1;
    }

    /// Fresh snapshot of every provider's analytics.
    pub fn analytics(&self) -> BTreeMap<String, ProviderAnalytics> {
        self.records
            .read()
            .iter()
            .map(|(name, record)| {
                (name.clone(), ProviderAnalytics::from_record(&record.lock()))
            })
            .collect()
    }

    /// Analytics for one provider, when it has been seen.
    pub fn analytics_for(&self, provider: &str) -> Option<ProviderAnalytics> {
        self.records
            .read()
            .get(provider)
            .map(|record| ProviderAnalytics::from_record(&record.lock()))
    }

    pub fn reset(&self) {
        self.records.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_failure_counters() {
        let tracker = PerformanceTracker::new();
        tracker.record_success("a", Duration::from_millis(100), 0.8, 40, true);
        tracker.record_success("a", Duration::from_millis(200), 0.6, 60, false);
        tracker.record_failure("a");

        let analytics = tracker.analytics_for("a").unwrap();
        assert_eq!(analytics.total_requests, 3);
        assert_eq!(analytics.successes, 2);
        assert_eq!(analytics.failures, 1);
        assert_eq!(analytics.wins, 1);
        assert!((analytics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((analytics.average_latency_ms - 150.0).abs() < 1e-9);
        assert!((analytics.average_score - 0.7).abs() < 1e-9);
        assert!((analytics.average_tokens - 50.0).abs() < 1e-9);
        assert!((analytics.win_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unseen_provider_has_no_analytics() {
        let tracker = PerformanceTracker::new();
        assert!(tracker.analytics_for("ghost").is_none());
        assert!(tracker.analytics().is_empty());
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        let tracker = PerformanceTracker::new();
        tracker.record_failure("b");
        let analytics = tracker.analytics_for("b").unwrap();
        assert_eq!(analytics.success_rate, 0.0);
        assert_eq!(analytics.average_latency_ms, 0.0);
        assert_eq!(analytics.average_score, 0.0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let tracker = PerformanceTracker::new();
        tracker.record_success("a", Duration::from_millis(10), 1.0, 5, true);
        let snapshot = tracker.analytics();
        tracker.record_success("a", Duration::from_millis(10), 1.0, 5, false);
        assert_eq!(snapshot["a"].successes, 1);
        assert_eq!(tracker.analytics()["a"].successes, 2);
    }

    #[test]
    fn test_reset_clears_records() {
        let tracker = PerformanceTracker::new();
        tracker.record_failure("a");
        tracker.reset();
        assert!(tracker.analytics().is_empty());
    }

    #[test]
    fn test_concurrent_updates() {
        let tracker = Arc::new(PerformanceTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let provider = if worker % 2 == 0 { "even" } else { "odd" };
                    for _ in 0..100 {
                        tracker.record_success(
                            provider,
                            Duration::from_millis(1),
                            0.5,
                            1,
                            false,
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.analytics_for("even").unwrap().successes, 400);
        assert_eq!(tracker.analytics_for("odd").unwrap().successes, 400);
    }
}
