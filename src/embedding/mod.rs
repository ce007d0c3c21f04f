//! Embedding router: picks a CPU or GPU embedding target for a caller,
//! the one place in this crate that fails *open* rather than closed — an
//! availability check we cannot complete is treated as "assume reachable"
//! so embedding never blocks on a flaky probe.

pub mod metrics;

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::EmbeddingPolicy;

pub use metrics::Metrics;

/// An embedding backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// CPU-hosted embedding service.
    Cpu,
    /// GPU-hosted embedding service.
    Gpu,
}

impl Target {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        }
    }
}

/// Outcome of one routing resolution.
#[derive(Debug, Clone)]
pub struct EmbeddingRoutingDecision {
    /// Policy the caller requested.
    pub requested_policy: EmbeddingPolicy,
    /// Target the caller asked to pin to, if any.
    pub requested_target: Option<Target>,
    /// Target actually selected. `None` iff `hard_error`.
    pub effective_target: Option<Target>,
    /// Why a fallback happened, if it did.
    pub fallback_reason: Option<&'static str>,
    /// True when no target could serve the request.
    pub hard_error: bool,
    /// HTTP-style error code paired with `hard_error`.
    pub error_code: Option<u16>,
}

/// A source of target availability, queried through a cache.
pub trait AvailabilityProbe: Send + Sync {
    /// Returns `Some(true/false)` when the probe completed, `None` when it
    /// could not be determined (timeout, unreachable, etc).
    fn probe(&self, target: Target) -> Option<bool>;
}

/// Connect timeout for one availability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes a target with a short `GET {base_url}/api/version`.
///
/// The probe blocks: the router and its callers (archive writes, the
/// SQL-memory embedding path at startup) run on worker threads, never on
/// the async runtime. A connection refusal is a completed "down" answer; a
/// timeout is "unknown", which the router treats optimistically.
pub struct HttpAvailabilityProbe {
    client: reqwest::blocking::Client,
    cpu_base_url: String,
    gpu_base_url: String,
}

impl HttpAvailabilityProbe {
    /// Build a probe over the two target base URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        cpu_base_url: impl Into<String>,
        gpu_base_url: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            cpu_base_url: cpu_base_url.into().trim_end_matches('/').to_owned(),
            gpu_base_url: gpu_base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn base_url(&self, target: Target) -> &str {
        match target {
            Target::Cpu => &self.cpu_base_url,
            Target::Gpu => &self.gpu_base_url,
        }
    }
}

impl AvailabilityProbe for HttpAvailabilityProbe {
    fn probe(&self, target: Target) -> Option<bool> {
        let url = format!("{}/api/version", self.base_url(target));
        match self.client.get(&url).send() {
            Ok(response) => Some(response.status().is_success()),
            Err(e) if e.is_timeout() => None,
            Err(_) => Some(false),
        }
    }
}

struct CacheEntry {
    value: Option<bool>,
    checked_at: Instant,
}

/// Routes embedding calls to CPU/GPU per [`EmbeddingPolicy`], caching
/// availability probes for `ttl`.
pub struct EmbeddingRouter {
    probe: Box<dyn AvailabilityProbe>,
    ttl: Duration,
    cache: RwLock<HashMap<Target, CacheEntry>>,
    metrics: Metrics,
}

impl EmbeddingRouter {
    /// Build a router over `probe`, caching results for `ttl`.
    pub fn new(probe: Box<dyn AvailabilityProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            ttl,
            cache: RwLock::new(HashMap::new()),
            metrics: Metrics::default(),
        }
    }

    /// Read-only access to accumulated metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Cached availability for `target`. `None` means unknown within this
    /// TTL window, in which case callers treat the target as available
    /// (optimistic fail-open).
    fn availability(&self, target: Target) -> bool {
        {
            let cache = self.cache.read().expect("embedding cache poisoned");
            if let Some(entry) = cache.get(&target) {
                if entry.checked_at.elapsed() < self.ttl {
                    return entry.value.unwrap_or(true);
                }
            }
        }

        let value = self.probe.probe(target);
        self.cache.write().expect("embedding cache poisoned").insert(
            target,
            CacheEntry {
                value,
                checked_at: Instant::now(),
            },
        );
        value.unwrap_or(true)
    }

    /// Resolve an effective target for `policy`. `optional_pin` is accepted
    /// for future target pinning but does not currently change the matrix
    /// outcome.
    pub fn resolve(
        &self,
        policy: EmbeddingPolicy,
        optional_pin: Option<Target>,
    ) -> EmbeddingRoutingDecision {
        let started = Instant::now();
        let cpu_ok = self.availability(Target::Cpu);
        let gpu_ok = self.availability(Target::Gpu);

        let decision = match policy {
            EmbeddingPolicy::CpuOnly => {
                if cpu_ok {
                    self.resolved(policy, optional_pin, Target::Cpu, None)
                } else {
                    self.metrics.record_target_error(Target::Cpu);
                    tracing::error!(policy = "cpu_only", cpu_ok, gpu_ok, "embedding routing hard error");
                    self.hard_error(policy, optional_pin)
                }
            }
            EmbeddingPolicy::PreferGpu => {
                if gpu_ok {
                    self.resolved(policy, optional_pin, Target::Gpu, None)
                } else if cpu_ok {
                    self.metrics.record_fallback(Target::Gpu, Target::Cpu);
                    tracing::warn!(policy = "prefer_gpu", cpu_ok, gpu_ok, "falling back to cpu: gpu_down");
                    self.resolved(policy, optional_pin, Target::Cpu, Some("gpu_down"))
                } else {
                    self.metrics.record_target_error(Target::Gpu);
                    tracing::error!(policy = "prefer_gpu", cpu_ok, gpu_ok, "embedding routing hard error");
                    self.hard_error(policy, optional_pin)
                }
            }
            EmbeddingPolicy::Auto => {
                if gpu_ok {
                    self.resolved(policy, optional_pin, Target::Gpu, None)
                } else if cpu_ok {
                    self.metrics.record_fallback(Target::Gpu, Target::Cpu);
                    tracing::info!(policy = "auto", cpu_ok, gpu_ok, "falling back to cpu: gpu_down");
                    self.resolved(policy, optional_pin, Target::Cpu, Some("gpu_down"))
                } else {
                    self.metrics.record_target_error(Target::Gpu);
                    tracing::error!(policy = "auto", cpu_ok, gpu_ok, "embedding routing hard error");
                    self.hard_error(policy, optional_pin)
                }
            }
        };

        if let Some(target) = decision.effective_target {
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.metrics.record_latency(target, elapsed_ms);
        }

        decision
    }

    fn resolved(
        &self,
        policy: EmbeddingPolicy,
        pin: Option<Target>,
        target: Target,
        fallback_reason: Option<&'static str>,
    ) -> EmbeddingRoutingDecision {
        if fallback_reason.is_none() {
            tracing::info!(policy = ?policy, target = target.as_str(), "embedding routing resolved");
        }
        EmbeddingRoutingDecision {
            requested_policy: policy,
            requested_target: pin,
            effective_target: Some(target),
            fallback_reason,
            hard_error: false,
            error_code: None,
        }
    }

    fn hard_error(&self, policy: EmbeddingPolicy, pin: Option<Target>) -> EmbeddingRoutingDecision {
        EmbeddingRoutingDecision {
            requested_policy: policy,
            requested_target: pin,
            effective_target: None,
            fallback_reason: None,
            hard_error: true,
            error_code: Some(503),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        cpu: Option<bool>,
        gpu: Option<bool>,
    }

    impl AvailabilityProbe for FixedProbe {
        fn probe(&self, target: Target) -> Option<bool> {
            match target {
                Target::Cpu => self.cpu,
                Target::Gpu => self.gpu,
            }
        }
    }

    fn router(cpu: Option<bool>, gpu: Option<bool>) -> EmbeddingRouter {
        EmbeddingRouter::new(Box::new(FixedProbe { cpu, gpu }), Duration::from_secs(30))
    }

    #[test]
    fn cpu_only_never_routes_to_gpu_across_availability_states() {
        for (cpu, gpu) in [
            (Some(true), Some(true)),
            (Some(true), Some(false)),
            (Some(true), None),
            (Some(false), Some(true)),
        ] {
            let r = router(cpu, gpu);
            let decision = r.resolve(EmbeddingPolicy::CpuOnly, None);
            assert_ne!(decision.effective_target, Some(Target::Gpu));
        }
    }

    #[test]
    fn cpu_only_with_cpu_down_is_a_hard_error() {
        let r = router(Some(false), Some(true));
        let decision = r.resolve(EmbeddingPolicy::CpuOnly, None);
        assert!(decision.hard_error);
        assert_eq!(decision.error_code, Some(503));
        assert_eq!(decision.effective_target, None);
        assert_eq!(r.metrics().target_errors(Target::Cpu), 1);
    }

    #[test]
    fn prefer_gpu_falls_back_to_cpu_when_gpu_down() {
        let r = router(Some(true), Some(false));
        let decision = r.resolve(EmbeddingPolicy::PreferGpu, None);
        assert_eq!(decision.effective_target, Some(Target::Cpu));
        assert_eq!(decision.fallback_reason, Some("gpu_down"));
        assert_eq!(r.metrics().fallback_count(Target::Gpu, Target::Cpu), 1);
    }

    #[test]
    fn auto_prefers_gpu_when_available() {
        let r = router(Some(true), Some(true));
        let decision = r.resolve(EmbeddingPolicy::Auto, None);
        assert_eq!(decision.effective_target, Some(Target::Gpu));
        assert!(decision.fallback_reason.is_none());
    }

    #[test]
    fn unknown_availability_is_optimistic_fail_open() {
        let r = router(None, None);
        let decision = r.resolve(EmbeddingPolicy::Auto, None);
        assert!(!decision.hard_error);
        assert_eq!(decision.effective_target, Some(Target::Gpu));
    }

    #[test]
    fn http_probe_reports_refused_connection_as_down() {
        // Port 1 on loopback refuses immediately; that is a completed
        // "down" answer, not an unknown.
        let probe = HttpAvailabilityProbe::new("http://127.0.0.1:1", "http://127.0.0.1:1")
            .expect("probe construction");
        assert_eq!(probe.probe(Target::Cpu), Some(false));
    }

    #[test]
    fn availability_is_cached_within_ttl() {
        let r = router(Some(true), Some(true));
        let _ = r.resolve(EmbeddingPolicy::Auto, None);
        // Second call must hit the cache, not re-probe; FixedProbe returns the
        // same answer either way so this mainly guards the cache code path
        // doesn't panic on repeated reads.
        let decision = r.resolve(EmbeddingPolicy::Auto, None);
        assert_eq!(decision.effective_target, Some(Target::Gpu));
    }
}
