//! Plain atomic counters for embedding routing outcomes. No metrics
//! crate: a handful of `AtomicU64`s cover what's needed here, the same
//! tradeoff this codebase makes for session budgets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use std::collections::HashMap;

use super::Target;

/// Routing counters, safe to share across threads via `&Metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    fallback_total: RwLock<HashMap<(&'static str, &'static str), AtomicU64>>,
    target_errors_total: RwLock<HashMap<&'static str, AtomicU64>>,
    latency_count: RwLock<HashMap<&'static str, AtomicU64>>,
    latency_total_ms: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl Metrics {
    /// Record a fallback from one target to another.
    pub fn record_fallback(&self, from: Target, to: Target) {
        let key = (from.as_str(), to.as_str());
        if let Some(counter) = self.fallback_total.read().expect("metrics poisoned").get(&key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut map = self.fallback_total.write().expect("metrics poisoned");
        map.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hard error for `target`.
    pub fn record_target_error(&self, target: Target) {
        let key = target.as_str();
        if let Some(counter) = self.target_errors_total.read().expect("metrics poisoned").get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut map = self.target_errors_total.write().expect("metrics poisoned");
        map.entry(key).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
    }

    /// Current fallback count for `(from, to)`.
    pub fn fallback_count(&self, from: Target, to: Target) -> u64 {
        let key = (from.as_str(), to.as_str());
        self.fallback_total
            .read()
            .expect("metrics poisoned")
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Current error count for `target`.
    pub fn target_errors(&self, target: Target) -> u64 {
        self.target_errors_total
            .read()
            .expect("metrics poisoned")
            .get(target.as_str())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record one observation of latency against `target`, accumulating
    /// into a count and a running total (mean = total / count).
    pub fn record_latency(&self, target: Target, elapsed_ms: u64) {
        for (map, amount) in [
            (&self.latency_count, 1),
            (&self.latency_total_ms, elapsed_ms),
        ] {
            let key = target.as_str();
            if let Some(counter) = map.read().expect("metrics poisoned").get(key) {
                counter.fetch_add(amount, Ordering::Relaxed);
                continue;
            }
            let mut write = map.write().expect("metrics poisoned");
            write
                .entry(key)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(amount, Ordering::Relaxed);
        }
    }

    /// Accumulated `(observation_count, total_ms)` for `target`.
    pub fn latency(&self, target: Target) -> (u64, u64) {
        let read = |map: &RwLock<HashMap<&'static str, AtomicU64>>| {
            map.read()
                .expect("metrics poisoned")
                .get(target.as_str())
                .map(|c| c.load(Ordering::Relaxed))
                .unwrap_or(0)
        };
        (read(&self.latency_count), read(&self.latency_total_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_accumulates_count_and_total() {
        let metrics = Metrics::default();
        assert_eq!(metrics.latency(Target::Cpu), (0, 0));
        metrics.record_latency(Target::Cpu, 12);
        metrics.record_latency(Target::Cpu, 8);
        assert_eq!(metrics.latency(Target::Cpu), (2, 20));
        assert_eq!(metrics.latency(Target::Gpu), (0, 0));
    }
}
