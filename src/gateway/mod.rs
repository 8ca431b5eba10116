//! Gateway Façade
//!
//! Single entry point tying the subsystems together: admission control,
//! policy-ordered dispatch, fallback recovery, caching, and telemetry. One
//! `Gateway` is built from configuration at startup and shared for the
//! process lifetime.
//!
//! ## Modules
//!
//! - `dispatch`: chain execution with retries and breaker checks
//! - `policy`: per-request provider ordering
//! - `monitor`: adaptive routing weights
//! - `fallback`: ordered recovery tiers
//!
//! ## Request Flow
//!
//! ```text
//! execute_task -> limiter.admit -> fallback pipeline -> dispatcher -> providers
//!                      |                 |                   |
//!                   usage windows     cache tiers        breakers/monitor
//! ```

pub mod dispatch;
pub mod fallback;
pub mod monitor;
pub mod policy;

pub use dispatch::{DispatchConfig, DispatchPacing, Dispatcher};
pub use fallback::{FallbackManager, FallbackStrategy};
pub use monitor::{MonitorConfig, PerformanceMonitor, ProviderWeight};
pub use policy::PolicyEngine;

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::cache::{ResponseCache, TieredCacheStats};
use crate::config::GatewayConfig;
use crate::limits::{ResourceLimiter, UsageStats};
use crate::provider::{CircuitBreaker, HttpPool, ProviderEntry, build_entry, default_http_pool};
use crate::telemetry::{MetricsSummary, SpanStatus, Telemetry, Trace};
use crate::tokenizer::estimate_context_tokens;
use crate::types::{
    CorrelationId, GatewayError, HealthStatus, Result, TaskRequest, TaskResponse, TaskType,
};

// =============================================================================
// Status Reporting
// =============================================================================

/// Point-in-time view of one configured provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub name: String,
    pub health: HealthStatus,
    pub breaker_state: String,
    pub consecutive_errors: u32,
    pub weight: f64,
}

/// Point-in-time view of the shared HTTP connection pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// Live clients, checked out plus idle
    pub live: usize,
    /// Clients parked and ready for reuse
    pub idle: usize,
}

/// Point-in-time view of the whole gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub providers: Vec<ProviderStatus>,
    pub usage: UsageStats,
    pub cache: TieredCacheStats,
    pub http_pool: PoolStatus,
    pub active_traces: usize,
}

/// Result of probing one provider backend
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthReport {
    pub id: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

// =============================================================================
// Gateway
// =============================================================================

/// Orchestrates task execution across all configured providers
pub struct Gateway {
    dispatcher: Arc<Dispatcher>,
    fallback: FallbackManager,
    limiter: Arc<ResourceLimiter>,
    cache: Arc<ResponseCache>,
    monitor: Arc<PerformanceMonitor>,
    breakers: Arc<DashMap<String, CircuitBreaker>>,
    http_pool: HttpPool,
    telemetry: Telemetry,
}

impl Gateway {
    /// Build a gateway from configuration.
    ///
    /// Fails fast on a disabled gateway, an empty provider list, or any
    /// provider that cannot be constructed (e.g. missing API key).
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        if !config.enabled {
            return Err(GatewayError::Config(
                "Gateway is disabled in configuration".to_string(),
            ));
        }
        config.validate()?;

        let http_pool = default_http_pool();
        let entries = config
            .providers
            .iter()
            .map(|settings| build_entry(settings, &http_pool))
            .collect::<Result<Vec<_>>>()?;

        let cache = match &config.cache.shared_path {
            Some(path) => ResponseCache::with_shared(
                config.cache.local_capacity,
                config.cache.ttl_policy(),
                path,
            )?,
            None => ResponseCache::local_only(
                config.cache.local_capacity,
                config.cache.ttl_policy(),
            ),
        };

        let gateway = Self::assemble(
            entries,
            Arc::new(cache),
            config.dispatch.dispatch_config(),
            config.telemetry.monitor_config(),
            config.fallback.parsed()?,
            Arc::new(ResourceLimiter::new(config.limits.limiter_config())),
            http_pool,
            Telemetry::with_retention(config.telemetry.trace_retention_hours as i64),
        );

        info!(
            providers = gateway.dispatcher.entries().len(),
            shared_cache = config.cache.shared_path.is_some(),
            "Gateway initialized"
        );

        Ok(gateway)
    }

    /// Wire the subsystems together from prebuilt parts
    fn assemble(
        entries: Vec<ProviderEntry>,
        cache: Arc<ResponseCache>,
        dispatch_config: DispatchConfig,
        monitor_config: MonitorConfig,
        strategies: Vec<FallbackStrategy>,
        limiter: Arc<ResourceLimiter>,
        http_pool: HttpPool,
        telemetry: Telemetry,
    ) -> Self {
        let breakers: Arc<DashMap<String, CircuitBreaker>> = Arc::new(DashMap::new());
        let monitor = Arc::new(PerformanceMonitor::new(
            Arc::clone(&breakers),
            monitor_config,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            entries,
            Arc::clone(&breakers),
            Arc::clone(&monitor),
            telemetry.clone(),
            dispatch_config,
        ));
        let fallback = FallbackManager::new(
            Arc::clone(&dispatcher),
            Arc::clone(&cache),
            strategies,
            telemetry.clone(),
        );

        Self {
            dispatcher,
            fallback,
            limiter,
            cache,
            monitor,
            breakers,
            http_pool,
            telemetry,
        }
    }

    // =========================================================================
    // Task Execution
    // =========================================================================

    /// Execute one task.
    ///
    /// Admission rejections (`RateLimited`, slot `Timeout`) surface as errors
    /// before any provider is contacted. Once admitted the call always
    /// resolves to a response; provider exhaustion degrades rather than
    /// raising.
    pub async fn execute_task(&self, request: &TaskRequest) -> Result<TaskResponse> {
        self.execute_task_for(request, None).await
    }

    /// Execute one task on behalf of a named caller (traceable via
    /// [`Gateway::traces_for_caller`]).
    #[instrument(skip(self, request), fields(task = %request.task_type))]
    pub async fn execute_task_for(
        &self,
        request: &TaskRequest,
        caller_id: Option<&str>,
    ) -> Result<TaskResponse> {
        let correlation = CorrelationId::generate();
        self.telemetry
            .tracer
            .begin(&correlation, caller_id.map(str::to_string));

        let estimated_tokens = estimate_context_tokens(&request.context) as u64;
        let _permit = self.limiter.admit(estimated_tokens).await?;

        let root = self
            .telemetry
            .tracer
            .start_span(&correlation, "execute_task", None);
        let response = self
            .fallback
            .execute(request, &correlation, root.as_deref())
            .await;
        if let Some(span_id) = &root {
            let status = if response.success {
                SpanStatus::Completed
            } else {
                SpanStatus::Failed
            };
            self.telemetry
                .tracer
                .finish_span(&correlation, span_id, status, None);
        }

        if let Some(cost) = response.cost_usd
            && cost > 0.0
        {
            self.limiter.record_cost(cost);
        }

        Ok(response.with_metadata(
            "correlation_id",
            Value::String(correlation.into_inner()),
        ))
    }

    // =========================================================================
    // Task Helpers
    // =========================================================================

    /// Find items similar to `query` among `candidates`
    pub async fn similarity_search(
        &self,
        query: &str,
        candidates: Value,
        limit: usize,
    ) -> Result<TaskResponse> {
        let request = TaskRequest::new(TaskType::SimilaritySearch)
            .with_context("query", Value::String(query.to_string()))
            .with_context("candidates", candidates)
            .with_limit(limit);
        self.execute_task(&request).await
    }

    /// Run a structured analysis over `payload`
    pub async fn analyze(&self, payload: Value) -> Result<TaskResponse> {
        let request = TaskRequest::new(TaskType::Analysis).with_context("payload", payload);
        self.execute_task(&request).await
    }

    /// Generate suggestions for `subject`
    pub async fn suggest(&self, subject: &str, limit: usize) -> Result<TaskResponse> {
        let request = TaskRequest::new(TaskType::Suggestion)
            .with_context("subject", Value::String(subject.to_string()))
            .with_limit(limit);
        self.execute_task(&request).await
    }

    /// Free-form completion of `prompt`
    pub async fn complete(&self, prompt: &str) -> Result<TaskResponse> {
        let request = TaskRequest::new(TaskType::Completion)
            .with_context("prompt", Value::String(prompt.to_string()));
        self.execute_task(&request).await
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Point-in-time status across all subsystems
    pub fn status(&self) -> GatewayStatus {
        let providers = self
            .dispatcher
            .entries()
            .iter()
            .map(|entry| {
                let breaker_state = self
                    .breakers
                    .get(entry.id())
                    .map(|b| b.state().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                ProviderStatus {
                    id: entry.id().to_string(),
                    name: entry.descriptor.name.clone(),
                    health: entry.descriptor.health(),
                    breaker_state,
                    consecutive_errors: entry.descriptor.consecutive_errors(),
                    weight: self.monitor.weight(entry.id()),
                }
            })
            .collect();

        GatewayStatus {
            providers,
            usage: self.limiter.usage(),
            cache: self.cache.stats(),
            http_pool: PoolStatus {
                live: self.http_pool.size(),
                idle: self.http_pool.idle_count(),
            },
            active_traces: self.telemetry.tracer.len(),
        }
    }

    /// Per-provider metrics rollup
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.telemetry.metrics.summary()
    }

    /// Trace for one request, if still retained
    pub fn trace(&self, correlation_id: &CorrelationId) -> Option<Trace> {
        self.telemetry.tracer.get(correlation_id)
    }

    /// All retained traces for a caller, newest first
    pub fn traces_for_caller(&self, caller_id: &str) -> Vec<Trace> {
        self.telemetry.tracer.by_caller(caller_id)
    }

    /// Probe every provider backend and update descriptor health
    pub async fn health_check(&self) -> Vec<ProviderHealthReport> {
        let mut reports = Vec::new();
        for entry in self.dispatcher.entries() {
            let report = match entry.provider.health_check().await {
                Ok(true) => {
                    entry.descriptor.set_health(HealthStatus::Healthy);
                    ProviderHealthReport {
                        id: entry.id().to_string(),
                        healthy: true,
                        detail: None,
                    }
                }
                Ok(false) => {
                    entry.descriptor.set_health(HealthStatus::Unhealthy);
                    ProviderHealthReport {
                        id: entry.id().to_string(),
                        healthy: false,
                        detail: Some("backend reported not ready".to_string()),
                    }
                }
                Err(e) => {
                    entry.descriptor.set_health(HealthStatus::Unhealthy);
                    ProviderHealthReport {
                        id: entry.id().to_string(),
                        healthy: false,
                        detail: Some(e.to_string()),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }

    /// Periodic housekeeping: expire cache entries, drop stale traces, reap
    /// idle pooled connections, and move cooled-down breakers to half-open
    pub async fn maintain(&self) {
        self.cache.sweep();
        self.telemetry.purge();
        self.http_pool.maintain().await;
        for breaker in self.breakers.iter() {
            breaker.value().check_cooldown();
        }
    }

    /// Drop all cached responses
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlPolicy;
    use crate::gateway::dispatch::tests::{MockProvider, mock_entry};
    use crate::limits::LimiterConfig;
    use crate::limits::pool::{PoolConfig, ResourcePool};
    use crate::provider::{BreakerConfig, BreakerState, HttpConnectionFactory, ProviderSettings};
    use crate::types::ErrorCategory;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn test_gateway(entries: Vec<ProviderEntry>, limiter: LimiterConfig) -> Gateway {
        Gateway::assemble(
            entries,
            Arc::new(ResponseCache::local_only(100, TtlPolicy::default())),
            DispatchConfig {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..Default::default()
            },
            MonitorConfig::default(),
            FallbackStrategy::default_order(),
            Arc::new(ResourceLimiter::new(limiter)),
            ResourcePool::new(
                HttpConnectionFactory,
                PoolConfig {
                    min_size: 0,
                    max_size: 4,
                    acquire_timeout: Duration::from_millis(50),
                    idle_reap_after: Duration::from_millis(1),
                },
            ),
            Telemetry::default(),
        )
    }

    #[test]
    fn test_disabled_config_rejected() {
        let config = GatewayConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(matches!(
            Gateway::new(&config),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_empty_provider_list_rejected() {
        let config = GatewayConfig::default();
        assert!(Gateway::new(&config).is_err());
    }

    #[test]
    fn test_constructs_with_local_provider() {
        let config = GatewayConfig {
            providers: vec![ProviderSettings {
                kind: "ollama".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let gateway = Gateway::new(&config).unwrap();

        let status = gateway.status();
        assert_eq!(status.providers.len(), 1);
        assert_eq!(status.providers[0].breaker_state, "closed");
    }

    #[tokio::test]
    async fn test_execute_task_attaches_correlation_id() {
        let provider = Arc::new(MockProvider::reliable("p"));
        let gateway = test_gateway(vec![mock_entry(provider)], LimiterConfig::default());

        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        let response = gateway
            .execute_task_for(&request, Some("svc-a"))
            .await
            .unwrap();

        assert!(response.success);
        let correlation = response.metadata["correlation_id"].as_str().unwrap();
        assert!(gateway.trace(&CorrelationId::new(correlation)).is_some());
        assert_eq!(gateway.traces_for_caller("svc-a").len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_before_any_provider_call() {
        let provider = Arc::new(MockProvider::reliable("p"));
        let gateway = test_gateway(
            vec![mock_entry(Arc::clone(&provider))],
            LimiterConfig {
                max_requests_per_minute: 0,
                ..Default::default()
            },
        );

        let request = TaskRequest::new(TaskType::Analysis);
        let result = gateway.execute_task(&request).await;

        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_providers_degrade_instead_of_raising() {
        let down = Arc::new(MockProvider::failing("down", ErrorCategory::Unavailable));
        let gateway = test_gateway(vec![mock_entry(down)], LimiterConfig::default());

        let request = TaskRequest::new(TaskType::Suggestion).with_context("q", json!("x"));
        let response = gateway.execute_task(&request).await.unwrap();

        assert!(!response.success);
        assert!(response.fallback_used);
    }

    #[tokio::test]
    async fn test_similarity_search_helper_shapes_request() {
        let provider = Arc::new(MockProvider::reliable("p"));
        let gateway = test_gateway(vec![mock_entry(provider)], LimiterConfig::default());

        let response = gateway
            .similarity_search("brakes", json!(["brake pad", "oil filter"]), 3)
            .await
            .unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_maintain_reaps_idle_pool_connections() {
        let provider = Arc::new(MockProvider::reliable("p"));
        let gateway = test_gateway(vec![mock_entry(provider)], LimiterConfig::default());

        let conn = gateway.http_pool.acquire().await.unwrap();
        drop(conn);
        assert_eq!(gateway.status().http_pool.idle, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        gateway.maintain().await;

        assert_eq!(gateway.status().http_pool.live, 0);
    }

    #[tokio::test]
    async fn test_maintain_moves_cooled_breaker_to_half_open() {
        let provider = Arc::new(MockProvider::reliable("p"));
        let gateway = test_gateway(vec![mock_entry(provider)], LimiterConfig::default());

        gateway.breakers.insert(
            "p".to_string(),
            CircuitBreaker::new(
                "p",
                BreakerConfig {
                    failure_threshold: 1,
                    cooldown: Duration::from_millis(1),
                    ..Default::default()
                },
            ),
        );
        gateway.breakers.get("p").unwrap().record_failure();
        assert_eq!(gateway.breakers.get("p").unwrap().state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;
        gateway.maintain().await;

        assert_eq!(
            gateway.breakers.get("p").unwrap().state(),
            BreakerState::HalfOpen
        );
    }

    #[tokio::test]
    async fn test_spend_feeds_usage_window() {
        let provider = Arc::new(MockProvider::reliable("p"));
        let gateway = test_gateway(vec![mock_entry(provider)], LimiterConfig::default());

        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        let _ = gateway.execute_task(&request).await.unwrap();

        let usage = gateway.status().usage;
        assert_eq!(usage.requests_last_minute, 1);
        assert_eq!(usage.in_flight, 0);
    }
}
