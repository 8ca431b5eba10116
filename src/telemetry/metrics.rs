//! Gateway Metrics Collection
//!
//! Per-provider and per-task counters with bounded latency samples.
//! Uses atomic operations for counters and a mutex only around the sample
//! ring, keeping contention low under concurrent dispatch. Costs are stored
//! as microdollars so they stay integral under atomic addition.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::constants::telemetry as telemetry_constants;
use crate::types::{ErrorCategory, TaskType, TokenUsage};

/// Health verdict derived from recent success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsVerdict {
    Healthy,
    Degraded,
    Unhealthy,
    /// Not enough samples to judge
    Unknown,
}

/// Counters for one provider
struct ProviderCounters {
    calls: AtomicU32,
    successes: AtomicU32,
    failures: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micros: AtomicU64,
    latency_samples: Mutex<VecDeque<u64>>,
    errors_by_category: DashMap<ErrorCategory, u64>,
    calls_by_task: DashMap<TaskType, u64>,
}

impl ProviderCounters {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::new()),
            errors_by_category: DashMap::new(),
            calls_by_task: DashMap::new(),
        }
    }

    fn push_latency(&self, latency_ms: u64) {
        let mut samples = self
            .latency_samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if samples.len() >= telemetry_constants::LATENCY_SAMPLE_CAP {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }
}

/// Latency distribution for one provider
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// Snapshot of one provider's counters
#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetrics {
    pub provider: String,
    pub calls: u32,
    pub successes: u32,
    pub failures: u32,
    pub success_rate: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub latency: LatencySummary,
    pub errors_by_category: Vec<(String, u64)>,
    pub calls_by_task: Vec<(String, u64)>,
    pub verdict: MetricsVerdict,
}

/// Gateway-wide snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_calls: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub providers: Vec<ProviderMetrics>,
}

/// Thread-safe metrics registry keyed by provider id
pub struct MetricsCollector {
    providers: DashMap<String, ProviderCounters>,
    healthy_threshold: f64,
    degraded_threshold: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            providers: DashMap::new(),
            healthy_threshold: 0.9,
            degraded_threshold: 0.5,
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful provider call
    pub fn record_success(
        &self,
        provider: &str,
        task_type: TaskType,
        usage: &TokenUsage,
        cost_usd: f64,
        latency_ms: u64,
    ) {
        let counters = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(ProviderCounters::new);

        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters.successes.fetch_add(1, Ordering::Relaxed);
        counters
            .input_tokens
            .fetch_add(usage.input_tokens as u64, Ordering::Relaxed);
        counters
            .output_tokens
            .fetch_add(usage.output_tokens as u64, Ordering::Relaxed);
        counters
            .cost_micros
            .fetch_add((cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);
        counters.push_latency(latency_ms);
        *counters.calls_by_task.entry(task_type).or_insert(0) += 1;
    }

    /// Record a failed provider call
    pub fn record_failure(
        &self,
        provider: &str,
        task_type: TaskType,
        category: ErrorCategory,
        latency_ms: u64,
    ) {
        let counters = self
            .providers
            .entry(provider.to_string())
            .or_insert_with(ProviderCounters::new);

        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters.failures.fetch_add(1, Ordering::Relaxed);
        counters.push_latency(latency_ms);
        *counters.errors_by_category.entry(category).or_insert(0) += 1;
        *counters.calls_by_task.entry(task_type).or_insert(0) += 1;
    }

    /// Snapshot one provider's metrics
    pub fn provider_metrics(&self, provider: &str) -> Option<ProviderMetrics> {
        self.providers
            .get(provider)
            .map(|counters| self.snapshot_provider(provider, &counters))
    }

    /// Snapshot everything
    pub fn summary(&self) -> MetricsSummary {
        let providers: Vec<ProviderMetrics> = self
            .providers
            .iter()
            .map(|entry| self.snapshot_provider(entry.key(), entry.value()))
            .collect();

        MetricsSummary {
            total_calls: providers.iter().map(|p| p.calls).sum(),
            total_successes: providers.iter().map(|p| p.successes).sum(),
            total_failures: providers.iter().map(|p| p.failures).sum(),
            total_cost_usd: providers.iter().map(|p| p.total_cost_usd).sum(),
            total_tokens: providers
                .iter()
                .map(|p| p.input_tokens + p.output_tokens)
                .sum(),
            providers,
        }
    }

    fn snapshot_provider(&self, provider: &str, counters: &ProviderCounters) -> ProviderMetrics {
        let calls = counters.calls.load(Ordering::Relaxed);
        let successes = counters.successes.load(Ordering::Relaxed);
        let failures = counters.failures.load(Ordering::Relaxed);
        let success_rate = if calls > 0 {
            successes as f64 / calls as f64
        } else {
            0.0
        };

        let verdict = if calls == 0 {
            MetricsVerdict::Unknown
        } else if success_rate >= self.healthy_threshold {
            MetricsVerdict::Healthy
        } else if success_rate >= self.degraded_threshold {
            MetricsVerdict::Degraded
        } else {
            MetricsVerdict::Unhealthy
        };

        ProviderMetrics {
            provider: provider.to_string(),
            calls,
            successes,
            failures,
            success_rate,
            input_tokens: counters.input_tokens.load(Ordering::Relaxed),
            output_tokens: counters.output_tokens.load(Ordering::Relaxed),
            total_cost_usd: counters.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            latency: summarize_latency(&counters.latency_samples),
            errors_by_category: counters
                .errors_by_category
                .iter()
                .map(|e| (format!("{:?}", e.key()), *e.value()))
                .collect(),
            calls_by_task: counters
                .calls_by_task
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
            verdict,
        }
    }
}

fn summarize_latency(samples: &Mutex<VecDeque<u64>>) -> LatencySummary {
    let samples = samples
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if samples.is_empty() {
        return LatencySummary::default();
    }

    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();

    let sum: u64 = sorted.iter().sum();
    let percentile = |p: f64| -> u64 {
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    };

    LatencySummary {
        avg_ms: sum as f64 / sorted.len() as f64,
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        p50_ms: percentile(0.50),
        p95_ms: percentile(0.95),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_success_accumulates() {
        let metrics = MetricsCollector::new();
        let usage = TokenUsage::new(100, 50);

        metrics.record_success("openai", TaskType::Analysis, &usage, 0.0125, 500);

        let snap = metrics.provider_metrics("openai").unwrap();
        assert_eq!(snap.calls, 1);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.input_tokens, 100);
        assert!((snap.total_cost_usd - 0.0125).abs() < 0.0001);
        assert_eq!(snap.verdict, MetricsVerdict::Healthy);
    }

    #[test]
    fn test_verdict_degrades_with_failures() {
        let metrics = MetricsCollector::new();
        let usage = TokenUsage::new(10, 5);

        for _ in 0..6 {
            metrics.record_success("flaky", TaskType::Completion, &usage, 0.0, 100);
        }
        for _ in 0..4 {
            metrics.record_failure("flaky", TaskType::Completion, ErrorCategory::Network, 100);
        }

        let snap = metrics.provider_metrics("flaky").unwrap();
        assert_eq!(snap.verdict, MetricsVerdict::Degraded);
        assert!((snap.success_rate - 0.6).abs() < 0.001);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = MetricsCollector::new();
        let usage = TokenUsage::default();

        for latency in [100, 200, 300, 400, 500, 600, 700, 800, 900, 1000] {
            metrics.record_success("p", TaskType::Analysis, &usage, 0.0, latency);
        }

        let latency = metrics.provider_metrics("p").unwrap().latency;
        assert_eq!(latency.min_ms, 100);
        assert_eq!(latency.max_ms, 1000);
        assert!((latency.avg_ms - 550.0).abs() < 0.001);
        assert!(latency.p50_ms >= 500 && latency.p50_ms <= 600);
        assert!(latency.p95_ms >= 900);
    }

    #[test]
    fn test_error_categories_tallied() {
        let metrics = MetricsCollector::new();
        metrics.record_failure("x", TaskType::Analysis, ErrorCategory::RateLimit, 10);
        metrics.record_failure("x", TaskType::Analysis, ErrorCategory::RateLimit, 10);
        metrics.record_failure("x", TaskType::Analysis, ErrorCategory::Network, 10);

        let snap = metrics.provider_metrics("x").unwrap();
        let rate_limit = snap
            .errors_by_category
            .iter()
            .find(|(cat, _)| cat == "RateLimit")
            .map(|(_, count)| *count);
        assert_eq!(rate_limit, Some(2));
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_success(
                            "shared",
                            TaskType::Analysis,
                            &TokenUsage::new(10, 5),
                            0.001,
                            50,
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let summary = metrics.summary();
        assert_eq!(summary.total_calls, 1000);
        assert_eq!(summary.total_tokens, 15_000);
        assert!((summary.total_cost_usd - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_summary_serializes() {
        let metrics = MetricsCollector::new();
        metrics.record_success(
            "openai",
            TaskType::Suggestion,
            &TokenUsage::new(1, 1),
            0.0,
            10,
        );

        let json = serde_json::to_value(metrics.summary()).unwrap();
        assert_eq!(json["total_calls"], 1);
    }
}
