//! Counters for admission, escrow and rebalancing activity.
//!
//! ```rust,ignore
//! use constellation_core::metrics::AdmissionMetrics;
//!
//! let metrics = AdmissionMetrics::new();
//! metrics.record_rejection("ReplayError");
//! println!("{}", metrics.to_json());
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A simple counter that can only increase.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up or down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    pub admissions_total: Counter,
    pub simulations_total: Counter,
    pub rollbacks_total: Counter,
    pub escrow_returned: Counter,
    pub escrow_forfeited: Counter,
    pub stake_actions: Counter,
    pub unstake_actions: Counter,
    pub vault_top_ups: Counter,
    pub reward_sweeps: Counter,

    pub active_escrows: Gauge,

    rejections: RwLock<BTreeMap<&'static str, u64>>,
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a rejection under its error tag.
    pub fn record_rejection(&self, tag: &'static str) {
        if let Ok(mut map) = self.rejections.write() {
            *map.entry(tag).or_insert(0) += 1;
        }
    }

    pub fn rejections(&self, tag: &str) -> u64 {
        self.rejections
            .read()
            .ok()
            .and_then(|map| map.get(tag).copied())
            .unwrap_or(0)
    }

    pub fn rejections_total(&self) -> u64 {
        self.rejections
            .read()
            .map(|map| map.values().sum())
            .unwrap_or(0)
    }

    /// Export metrics as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let rejections = self
            .rejections
            .read()
            .map(|map| {
                map.iter()
                    .map(|(tag, n)| ((*tag).to_string(), serde_json::Value::from(*n)))
                    .collect::<serde_json::Map<_, _>>()
            })
            .unwrap_or_default();

        serde_json::json!({
            "counters": {
                "admissions_total": self.admissions_total.get(),
                "simulations_total": self.simulations_total.get(),
                "rollbacks_total": self.rollbacks_total.get(),
                "escrow_returned": self.escrow_returned.get(),
                "escrow_forfeited": self.escrow_forfeited.get(),
                "stake_actions": self.stake_actions.get(),
                "unstake_actions": self.unstake_actions.get(),
                "vault_top_ups": self.vault_top_ups.get(),
                "reward_sweeps": self.reward_sweeps.get(),
            },
            "gauges": {
                "active_escrows": self.active_escrows.get(),
            },
            "rejections": rejections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let counter = Counter::new();
        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn gauge_does_not_underflow() {
        let gauge = Gauge::new();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
        gauge.set(2);
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 2);
    }

    #[test]
    fn rejections_are_bucketed_by_tag() {
        let metrics = AdmissionMetrics::new();
        metrics.record_rejection("ReplayError");
        metrics.record_rejection("ReplayError");
        metrics.record_rejection("WrongValue");
        assert_eq!(metrics.rejections("ReplayError"), 2);
        assert_eq!(metrics.rejections("BadSignature"), 0);
        assert_eq!(metrics.rejections_total(), 3);
    }

    #[test]
    fn metrics_export_to_json() {
        let metrics = AdmissionMetrics::new();
        metrics.admissions_total.inc();
        metrics.active_escrows.inc();
        metrics.record_rejection("DuplicateKeyError");

        let json = metrics.to_json();
        assert_eq!(json["counters"]["admissions_total"], 1);
        assert_eq!(json["gauges"]["active_escrows"], 1);
        assert_eq!(json["rejections"]["DuplicateKeyError"], 1);
    }
}
