//! Chain Dispatcher
//!
//! Executes a task against the ordered provider chain with per-call
//! deadlines and breaker checks. Skips providers whose breaker is open or
//! whose descriptor reads unhealthy, classifies every failure to decide
//! between retrying the same provider and moving down the chain, and feeds
//! outcomes into the breaker registry, the performance monitor, and
//! telemetry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::monitor::PerformanceMonitor;
use super::policy::PolicyEngine;
use crate::constants::chain as chain_constants;
use crate::provider::{
    BreakerConfig, BreakerState, BreakerStats, CircuitBreaker, ProviderEntry, ProviderResponse,
};
use crate::telemetry::{SpanRecord, SpanStatus, Telemetry};
use crate::timeout::with_timeout;
use crate::types::{CorrelationId, ErrorCategory, GatewayError, Result, TaskRequest};

/// Dispatch pacing: immediate runs the chain without sleeping, paced
/// inserts exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPacing {
    Immediate,
    Paced,
}

/// Chain execution configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Attempts across all providers before giving up
    pub max_total_attempts: usize,
    /// Retries against one provider before moving down the chain
    pub max_retries_per_provider: u32,
    /// Base delay for paced backoff
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_factor: f64,
    /// Deadline for a single provider call
    pub call_deadline: Duration,
    /// Breaker settings applied to every provider
    pub breaker: BreakerConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_total_attempts: chain_constants::MAX_TOTAL_ATTEMPTS,
            max_retries_per_provider: 2,
            base_delay: Duration::from_millis(chain_constants::BASE_DELAY_MS),
            max_delay: Duration::from_secs(chain_constants::MAX_DELAY_SECS),
            backoff_factor: chain_constants::BACKOFF_FACTOR,
            call_deadline: Duration::from_secs(chain_constants::CALL_DEADLINE_SECS),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Executes tasks against the ordered provider chain
pub struct Dispatcher {
    entries: Vec<ProviderEntry>,
    policy: PolicyEngine,
    breakers: Arc<DashMap<String, CircuitBreaker>>,
    monitor: Arc<PerformanceMonitor>,
    telemetry: Telemetry,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        entries: Vec<ProviderEntry>,
        breakers: Arc<DashMap<String, CircuitBreaker>>,
        monitor: Arc<PerformanceMonitor>,
        telemetry: Telemetry,
        config: DispatchConfig,
    ) -> Self {
        // One breaker per provider, created up front for the process lifetime
        for entry in &entries {
            breakers
                .entry(entry.id().to_string())
                .or_insert_with(|| CircuitBreaker::new(entry.id(), config.breaker.clone()));
        }

        Self {
            entries,
            policy: PolicyEngine::new(Arc::clone(&monitor)),
            breakers,
            monitor,
            telemetry,
            config,
        }
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        self.breakers.iter().map(|e| e.value().stats()).collect()
    }

    pub fn breaker_state(&self, provider: &str) -> Option<BreakerState> {
        self.breakers.get(provider).map(|b| b.state())
    }

    /// Execute one task against the chain.
    ///
    /// Returns the first successful provider response, or the last
    /// classified error once the chain is exhausted.
    #[instrument(skip(self, request, correlation), fields(task = %request.task_type))]
    pub async fn dispatch(
        &self,
        request: &TaskRequest,
        correlation: &CorrelationId,
        pacing: DispatchPacing,
    ) -> Result<ProviderResponse> {
        let chain = self.policy.order(request, &self.entries);
        if chain.is_empty() {
            return Err(GatewayError::unavailable(
                "any",
                format!("no provider supports task '{}'", request.task_type),
            ));
        }

        let mut total_attempts = 0usize;
        let mut last_error: Option<GatewayError> = None;

        for entry in &chain {
            let provider_id = entry.id().to_string();

            if !entry.descriptor.health().is_usable() {
                debug!(provider = %provider_id, "Skipping unhealthy provider");
                continue;
            }

            let breaker_open = self
                .breakers
                .get(&provider_id)
                .map(|b| b.state() == BreakerState::Open)
                .unwrap_or(false);
            if breaker_open {
                debug!(provider = %provider_id, "Skipping provider, breaker open");
                self.telemetry.tracer.record(
                    correlation,
                    SpanRecord::new("breaker_skip", SpanStatus::Completed, 0)
                        .with_provider(&provider_id),
                );
                continue;
            }

            // Paced dispatch also spaces out successive providers, not just
            // retries of the same one
            if pacing == DispatchPacing::Paced && total_attempts > 0 {
                let delay = self.config.base_delay + random_jitter(self.config.base_delay);
                debug!(
                    provider = %provider_id,
                    delay_ms = delay.as_millis() as u64,
                    "Pacing before next provider"
                );
                sleep(delay).await;
            }

            let mut current_delay = self.config.base_delay;

            for attempt in 1..=self.config.max_retries_per_provider {
                if total_attempts >= self.config.max_total_attempts {
                    break;
                }

                let allowed = self
                    .breakers
                    .get(&provider_id)
                    .map(|b| b.allow_request())
                    .unwrap_or(true);
                if !allowed {
                    debug!(provider = %provider_id, "Breaker blocked request");
                    break;
                }

                total_attempts += 1;
                let attempt_start = Instant::now();

                debug!(
                    provider = %provider_id,
                    attempt,
                    total_attempts,
                    "Chain attempt"
                );

                let outcome = with_timeout(
                    self.config.call_deadline,
                    entry.provider.execute(request),
                    "provider call",
                )
                .await;

                let latency_ms = attempt_start.elapsed().as_millis() as u64;

                match outcome {
                    Ok(response) => {
                        self.note_success(entry, request, &response, latency_ms);
                        self.telemetry.tracer.record(
                            correlation,
                            SpanRecord::new("provider_call", SpanStatus::Completed, latency_ms)
                                .with_provider(&provider_id),
                        );
                        info!(
                            provider = %provider_id,
                            attempts = total_attempts,
                            latency_ms,
                            "Dispatch succeeded"
                        );
                        return Ok(response);
                    }
                    Err(err) => {
                        let category = err.category().unwrap_or(ErrorCategory::Unknown);
                        let retry_after = match &err {
                            GatewayError::Provider(pe) => pe.retry_after,
                            _ => None,
                        };
                        self.note_failure(entry, request, category, latency_ms);

                        let span_status = if matches!(err, GatewayError::Timeout { .. }) {
                            SpanStatus::Timeout
                        } else {
                            SpanStatus::Failed
                        };
                        self.telemetry.tracer.record(
                            correlation,
                            SpanRecord::new("provider_call", span_status, latency_ms)
                                .with_provider(&provider_id)
                                .with_detail(err.to_string()),
                        );

                        warn!(
                            provider = %provider_id,
                            attempt,
                            error = %err,
                            ?category,
                            "Provider attempt failed"
                        );
                        last_error = Some(err);

                        let opened = self
                            .breakers
                            .get(&provider_id)
                            .map(|b| b.state() == BreakerState::Open)
                            .unwrap_or(false);
                        if opened {
                            info!(provider = %provider_id, "Breaker opened, moving to next provider");
                            break;
                        }

                        match category {
                            ErrorCategory::BadRequest => {
                                warn!("Request rejected as malformed, aborting chain");
                                return Err(last_error.take().unwrap_or_else(|| {
                                    GatewayError::ExhaustedFallback(
                                        "bad request with no recorded error".to_string(),
                                    )
                                }));
                            }
                            ErrorCategory::Auth
                            | ErrorCategory::TokenLimit
                            | ErrorCategory::Unavailable => {
                                debug!(provider = %provider_id, "Non-retryable here, next provider");
                                break;
                            }
                            ErrorCategory::RateLimit => {
                                if pacing == DispatchPacing::Paced
                                    && attempt < self.config.max_retries_per_provider
                                {
                                    let wait = retry_after
                                        .unwrap_or(Duration::from_secs(30))
                                        .min(Duration::from_secs(300));
                                    info!(wait_secs = wait.as_secs(), "Rate limited, backing off");
                                    sleep(wait).await;
                                } else {
                                    break;
                                }
                            }
                            ErrorCategory::Network
                            | ErrorCategory::Transient
                            | ErrorCategory::Unknown => {
                                if attempt < self.config.max_retries_per_provider
                                    && pacing == DispatchPacing::Paced
                                {
                                    let delay = current_delay + random_jitter(current_delay);
                                    debug!(delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                                    sleep(delay).await;
                                    current_delay = next_backoff(
                                        current_delay,
                                        self.config.backoff_factor,
                                        self.config.max_delay,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::ExhaustedFallback("all providers in chain failed".to_string())
        }))
    }

    fn note_success(
        &self,
        entry: &ProviderEntry,
        request: &TaskRequest,
        response: &ProviderResponse,
        latency_ms: u64,
    ) {
        if let Some(breaker) = self.breakers.get(entry.id()) {
            breaker.record_success();
        }
        entry.descriptor.record_success();
        self.monitor
            .record(entry.id(), latency_ms, true, response.cost_usd);
        self.telemetry.metrics.record_success(
            entry.id(),
            request.task_type,
            &response.usage,
            response.cost_usd,
            latency_ms,
        );
    }

    fn note_failure(
        &self,
        entry: &ProviderEntry,
        request: &TaskRequest,
        category: ErrorCategory,
        latency_ms: u64,
    ) {
        if let Some(breaker) = self.breakers.get(entry.id()) {
            breaker.record_failure();
        }
        entry.descriptor.record_error();
        self.monitor.record(entry.id(), latency_ms, false, 0.0);
        self.telemetry
            .metrics
            .record_failure(entry.id(), request.task_type, category, latency_ms);
    }
}

/// Random jitter up to a quarter of the base delay
fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

/// Exponential backoff with a cap
fn next_backoff(current: Duration, factor: f64, max: Duration) -> Duration {
    let next = Duration::from_secs_f64(current.as_secs_f64() * factor);
    std::cmp::min(next, max)
}
