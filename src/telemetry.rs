//! Typed domain events and plain atomic counters shared across components.
//!
//! This is the layer above raw `tracing` calls: a small enum of domain
//! events, each carrying its own structured fields, recorded through one
//! `tracing::info!`/`warn!` call per event so the JSON log layer sees a
//! consistent shape regardless of which component emitted it. Counters
//! are hand-rolled atomics behind [`Metrics`], the same tradeoff this
//! codebase makes in `embedding::metrics` over pulling in a metrics crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A domain event emitted by one of the pipeline components.
#[derive(Debug, Clone)]
pub enum Event {
    /// A pipeline stage (thinking, control, output) finished for a request.
    PipelineStageCompleted {
        /// Conversation this request belongs to.
        conversation_id: String,
        /// Stage name (`thinking`, `control`, `output`).
        stage: &'static str,
        /// Stage wall-clock duration.
        duration_ms: u64,
    },
    /// The control authority reached a decision for a skill or package action.
    ControlDecisionMade {
        /// Conversation this request belongs to.
        conversation_id: String,
        /// Resulting action (`approve`, `warn`, `escalate`, `deny`).
        decision: &'static str,
        /// Hallucination risk band feeding the decision.
        risk: &'static str,
    },
    /// A digest cycle finished (daily, weekly, or archive).
    DigestCycleCompleted {
        /// `daily`, `weekly`, or `archive`.
        cycle: &'static str,
        /// Digest key written, if the cycle wrote one.
        digest_key: Option<String>,
        /// Whether the cycle skipped (gate not met, already exists, or error).
        skipped: bool,
    },
    /// Embedding routing resolved to a target, possibly after a fallback.
    EmbeddingRoutingResolved {
        /// Target that served the request.
        target: &'static str,
        /// Whether this was reached via fallback from a preferred target.
        fell_back: bool,
        /// Request latency against the serving target.
        duration_ms: u64,
    },
    /// A graph hygiene reconciliation run finished.
    GraphHygieneRunCompleted {
        /// Number of drifted entries repaired.
        repaired: u64,
        /// Number of entries left unresolved after the run.
        unresolved: u64,
    },
}

impl Event {
    /// Record this event through `tracing`, one call per event so every
    /// sink (JSON file layer, console layer) observes the same fields.
    pub fn record(&self) {
        match self {
            Self::PipelineStageCompleted { conversation_id, stage, duration_ms } => {
                tracing::info!(
                    component = "c5",
                    conversation_id,
                    stage,
                    duration_ms,
                    "pipeline stage completed"
                );
            }
            Self::ControlDecisionMade { conversation_id, decision, risk } => {
                tracing::info!(
                    component = "c2",
                    conversation_id,
                    decision,
                    risk,
                    "control decision made"
                );
            }
            Self::DigestCycleCompleted { cycle, digest_key, skipped } => {
                tracing::info!(
                    component = "c6",
                    cycle,
                    digest_key = digest_key.as_deref().unwrap_or(""),
                    skipped,
                    "digest cycle completed"
                );
            }
            Self::EmbeddingRoutingResolved { target, fell_back, duration_ms } => {
                if *fell_back {
                    tracing::warn!(
                        component = "c7",
                        target,
                        fell_back,
                        duration_ms,
                        "embedding routing resolved via fallback"
                    );
                } else {
                    tracing::info!(
                        component = "c7",
                        target,
                        fell_back,
                        duration_ms,
                        "embedding routing resolved"
                    );
                }
            }
            Self::GraphHygieneRunCompleted { repaired, unresolved } => {
                tracing::info!(
                    component = "c8",
                    repaired,
                    unresolved,
                    "graph hygiene run completed"
                );
            }
        }
    }
}

/// Shared counters for metrics named across components (same
/// `routing_fallback_total`, `routing_target_errors_total`, and the
/// digest/pipeline equivalents). Safe to share across threads via `&Metrics`.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl Metrics {
    /// Increment a named counter by one, creating it on first use.
    pub fn incr(&self, name: &'static str) {
        self.incr_by(name, 1);
    }

    /// Increment a named counter by `amount`, creating it on first use.
    pub fn incr_by(&self, name: &'static str, amount: u64) {
        if let Some(counter) = self.counters.read().expect("metrics poisoned").get(name) {
            counter.fetch_add(amount, Ordering::Relaxed);
            return;
        }
        let mut map = self.counters.write().expect("metrics poisoned");
        map.entry(name).or_insert_with(|| AtomicU64::new(0)).fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value of a named counter, or 0 if never incremented.
    pub fn get(&self, name: &'static str) -> u64 {
        self.counters
            .read()
            .expect("metrics poisoned")
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_at_zero_and_accumulates() {
        let metrics = Metrics::default();
        assert_eq!(metrics.get("digest_cycles_total"), 0);
        metrics.incr("digest_cycles_total");
        metrics.incr_by("digest_cycles_total", 2);
        assert_eq!(metrics.get("digest_cycles_total"), 3);
    }

    #[test]
    fn counters_are_independent_by_name() {
        let metrics = Metrics::default();
        metrics.incr("routing_fallback_total");
        assert_eq!(metrics.get("routing_target_errors_total"), 0);
        assert_eq!(metrics.get("routing_fallback_total"), 1);
    }

    #[test]
    fn events_record_without_panicking() {
        Event::PipelineStageCompleted {
            conversation_id: "conv-1".to_owned(),
            stage: "control",
            duration_ms: 12,
        }
        .record();
        Event::DigestCycleCompleted {
            cycle: "daily",
            digest_key: Some("abc123".to_owned()),
            skipped: false,
        }
        .record();
    }
}
