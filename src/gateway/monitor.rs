//! Adaptive Performance Monitor
//!
//! Rolling per-provider samples feeding dynamic routing weights. Weights
//! blend success rate, relative latency, and relative cost, and are
//! recomputed at most once per interval to keep the dispatch hot path
//! cheap. A provider whose breaker is open always reads as weight zero.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::constants::telemetry as telemetry_constants;
use crate::provider::{BreakerState, CircuitBreaker};

/// Monitor tuning
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Samples kept per provider
    pub window_size: usize,
    /// Minimum interval between weight recomputations
    pub recompute_interval: Duration,
    /// Samples older than this are ignored when computing weights
    pub sample_retention: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: telemetry_constants::SAMPLE_WINDOW_SIZE,
            recompute_interval: Duration::from_secs(telemetry_constants::WEIGHT_RECOMPUTE_SECS),
            sample_retention: Duration::from_secs(telemetry_constants::SAMPLE_RETENTION_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PerfSample {
    at: Instant,
    latency_ms: u64,
    success: bool,
    cost_usd: f64,
}

#[derive(Debug)]
struct ProviderPerf {
    samples: VecDeque<PerfSample>,
    weight: f64,
}

impl ProviderPerf {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
            weight: 1.0,
        }
    }
}

/// Snapshot of one provider's routing weight
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderWeight {
    pub provider: String,
    pub weight: f64,
    pub sample_count: usize,
}

/// Per-provider performance tracker shared by policy and dispatch
pub struct PerformanceMonitor {
    perf: DashMap<String, ProviderPerf>,
    breakers: Arc<DashMap<String, CircuitBreaker>>,
    config: MonitorConfig,
    last_recompute: Mutex<Option<Instant>>,
}

impl PerformanceMonitor {
    pub fn new(breakers: Arc<DashMap<String, CircuitBreaker>>, config: MonitorConfig) -> Self {
        Self {
            perf: DashMap::new(),
            breakers,
            config,
            last_recompute: Mutex::new(None),
        }
    }

    /// Record the outcome of one provider call
    pub fn record(&self, provider: &str, latency_ms: u64, success: bool, cost_usd: f64) {
        let mut perf = self
            .perf
            .entry(provider.to_string())
            .or_insert_with(ProviderPerf::new);

        if perf.samples.len() >= self.config.window_size {
            perf.samples.pop_front();
        }
        perf.samples.push_back(PerfSample {
            at: Instant::now(),
            latency_ms,
            success,
            cost_usd,
        });
        drop(perf);

        self.maybe_recompute();
    }

    /// Routing weight for a provider. Open breaker forces zero.
    pub fn weight(&self, provider: &str) -> f64 {
        if let Some(breaker) = self.breakers.get(provider)
            && breaker.state() == BreakerState::Open
        {
            return 0.0;
        }

        self.perf.get(provider).map(|p| p.weight).unwrap_or(1.0)
    }

    /// Highest-weight candidate that is currently available.
    ///
    /// Candidates with weight zero (open breaker) are excluded entirely.
    pub fn select_best<S: AsRef<str>>(&self, candidates: &[S]) -> Option<String> {
        candidates
            .iter()
            .map(|c| (c.as_ref(), self.weight(c.as_ref())))
            .filter(|(_, w)| *w > 0.0)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.to_string())
    }

    /// All known weights, for status reporting
    pub fn weights(&self) -> Vec<ProviderWeight> {
        self.perf
            .iter()
            .map(|entry| ProviderWeight {
                provider: entry.key().clone(),
                weight: self.weight(entry.key()),
                sample_count: entry.value().samples.len(),
            })
            .collect()
    }

    /// Recompute weights if the interval has elapsed
    fn maybe_recompute(&self) {
        {
            let mut last = self
                .last_recompute
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(at) = *last
                && at.elapsed() < self.config.recompute_interval
            {
                return;
            }
            *last = Some(Instant::now());
        }
        self.recompute();
    }

    /// Force a recomputation (used by tests and status endpoints)
    pub fn recompute(&self) {
        let cutoff = Instant::now()
            .checked_sub(self.config.sample_retention)
            .unwrap_or_else(Instant::now);

        // First pass: per-provider aggregates over retained samples
        struct Agg {
            provider: String,
            avg_latency: f64,
            success_rate: f64,
            avg_cost: f64,
        }

        let mut aggregates: Vec<Agg> = Vec::new();
        for entry in self.perf.iter() {
            let retained: Vec<&PerfSample> = entry
                .value()
                .samples
                .iter()
                .filter(|s| s.at >= cutoff)
                .collect();
            if retained.is_empty() {
                continue;
            }

            let successes = retained.iter().filter(|s| s.success).count();
            aggregates.push(Agg {
                provider: entry.key().clone(),
                avg_latency: retained.iter().map(|s| s.latency_ms as f64).sum::<f64>()
                    / retained.len() as f64,
                success_rate: successes as f64 / retained.len() as f64,
                avg_cost: retained.iter().map(|s| s.cost_usd).sum::<f64>()
                    / retained.len() as f64,
            });
        }

        if aggregates.is_empty() {
            return;
        }

        let best_latency = aggregates
            .iter()
            .map(|a| a.avg_latency)
            .fold(f64::INFINITY, f64::min)
            .max(1.0);
        let best_cost = aggregates
            .iter()
            .filter(|a| a.avg_cost > 0.0)
            .map(|a| a.avg_cost)
            .fold(f64::INFINITY, f64::min);

        for agg in aggregates {
            let latency_score = (best_latency / agg.avg_latency.max(1.0)).clamp(0.0, 1.0);
            // Free providers score full marks on cost
            let cost_score = if agg.avg_cost <= 0.0 || !best_cost.is_finite() {
                1.0
            } else {
                (best_cost / agg.avg_cost).clamp(0.0, 1.0)
            };

            let weight =
                0.5 * agg.success_rate + 0.3 * latency_score + 0.2 * cost_score;

            if let Some(mut perf) = self.perf.get_mut(&agg.provider) {
                perf.weight = weight;
            }
            debug!(provider = %agg.provider, weight, "Routing weight updated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BreakerConfig;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(
            Arc::new(DashMap::new()),
            MonitorConfig {
                recompute_interval: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_unknown_provider_has_neutral_weight() {
        let monitor = monitor();
        assert_eq!(monitor.weight("unseen"), 1.0);
    }

    #[test]
    fn test_failures_reduce_weight() {
        let monitor = monitor();

        for _ in 0..10 {
            monitor.record("good", 100, true, 0.0);
        }
        for i in 0..10 {
            monitor.record("bad", 100, i % 2 == 0, 0.0);
        }
        monitor.recompute();

        assert!(monitor.weight("good") > monitor.weight("bad"));
    }

    #[test]
    fn test_slower_provider_weighs_less() {
        let monitor = monitor();

        for _ in 0..10 {
            monitor.record("fast", 50, true, 0.0);
            monitor.record("slow", 2000, true, 0.0);
        }
        monitor.recompute();

        assert!(monitor.weight("fast") > monitor.weight("slow"));
    }

    #[test]
    fn test_open_breaker_forces_zero_weight() {
        let breakers: Arc<DashMap<String, CircuitBreaker>> = Arc::new(DashMap::new());
        breakers.insert(
            "down".to_string(),
            CircuitBreaker::new(
                "down",
                BreakerConfig {
                    failure_threshold: 1,
                    ..Default::default()
                },
            ),
        );
        breakers.get("down").unwrap().record_failure();

        let monitor = PerformanceMonitor::new(Arc::clone(&breakers), MonitorConfig::default());
        for _ in 0..5 {
            monitor.record("down", 10, true, 0.0);
        }

        assert_eq!(monitor.weight("down"), 0.0);
    }

    #[test]
    fn test_select_best_prefers_reliable_and_skips_open_breaker() {
        let breakers: Arc<DashMap<String, CircuitBreaker>> = Arc::new(DashMap::new());
        breakers.insert(
            "down".to_string(),
            CircuitBreaker::new(
                "down",
                BreakerConfig {
                    failure_threshold: 1,
                    ..Default::default()
                },
            ),
        );
        breakers.get("down").unwrap().record_failure();

        let monitor = PerformanceMonitor::new(
            Arc::clone(&breakers),
            MonitorConfig {
                recompute_interval: Duration::ZERO,
                ..Default::default()
            },
        );
        for i in 0..10 {
            monitor.record("steady", 100, true, 0.0);
            monitor.record("shaky", 100, i % 2 == 0, 0.0);
        }
        monitor.recompute();

        let best = monitor.select_best(&["down", "shaky", "steady"]);
        assert_eq!(best.as_deref(), Some("steady"));

        // Nothing usable yields no selection
        assert!(monitor.select_best(&["down"]).is_none());
    }

    #[test]
    fn test_window_is_bounded() {
        let monitor = PerformanceMonitor::new(
            Arc::new(DashMap::new()),
            MonitorConfig {
                window_size: 5,
                recompute_interval: Duration::from_secs(3600),
                ..Default::default()
            },
        );

        for _ in 0..20 {
            monitor.record("p", 100, true, 0.0);
        }

        let weights = monitor.weights();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights[0].sample_count, 5);
    }
}
