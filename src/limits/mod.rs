//! Resource Limiting
//!
//! Pre-dispatch admission control. A semaphore bounds in-flight work and
//! rolling windows enforce requests-per-minute, tokens-per-minute, and
//! cost-per-hour ceilings. Window checks happen before any network call so
//! a saturated gateway rejects cheaply instead of burning provider quota.
//!
//! ## Modules
//!
//! - `pool`: generic bounded resource pool with health checking

pub mod pool;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::constants::limits as limit_constants;
use crate::types::{GatewayError, Result};

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum in-flight requests
    pub max_concurrent: usize,
    /// Requests admitted per rolling minute
    pub max_requests_per_minute: u32,
    /// Estimated tokens admitted per rolling minute
    pub max_tokens_per_minute: u64,
    /// Recorded spend admitted per rolling hour (USD)
    pub max_cost_per_hour: f64,
    /// How long to wait for a concurrency slot
    pub acquire_timeout: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: limit_constants::MAX_CONCURRENT,
            max_requests_per_minute: limit_constants::MAX_REQUESTS_PER_MINUTE,
            max_tokens_per_minute: limit_constants::MAX_TOKENS_PER_MINUTE,
            max_cost_per_hour: limit_constants::MAX_COST_PER_HOUR,
            acquire_timeout: Duration::from_secs(limit_constants::ACQUIRE_TIMEOUT_SECS),
        }
    }
}

/// Rolling window of (timestamp, amount) samples
struct RollingWindow {
    samples: VecDeque<(Instant, u64)>,
    span: Duration,
}

impl RollingWindow {
    fn new(span: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            span,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(ts, _)) = self.samples.front() {
            if now.duration_since(ts) >= self.span {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn total(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.samples.iter().map(|(_, amount)| amount).sum()
    }

    fn push(&mut self, now: Instant, amount: u64) {
        self.prune(now);
        self.samples.push_back((now, amount));
    }
}

/// Usage counters for status reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct UsageStats {
    pub in_flight: usize,
    pub requests_last_minute: u64,
    pub tokens_last_minute: u64,
    pub cost_last_hour_usd: f64,
    pub rejected_rate: u64,
    pub rejected_slot: u64,
}

/// Held for the lifetime of one admitted request
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

/// Gateway-wide admission controller
pub struct ResourceLimiter {
    config: LimiterConfig,
    slots: Arc<Semaphore>,
    requests: Mutex<RollingWindow>,
    tokens: Mutex<RollingWindow>,
    /// Cost tracked in microdollars so the window stays integral
    cost_micro: Mutex<RollingWindow>,
    rejected_rate: std::sync::atomic::AtomicU64,
    rejected_slot: std::sync::atomic::AtomicU64,
}

impl Default for ResourceLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl ResourceLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            requests: Mutex::new(RollingWindow::new(Duration::from_secs(60))),
            tokens: Mutex::new(RollingWindow::new(Duration::from_secs(60))),
            cost_micro: Mutex::new(RollingWindow::new(Duration::from_secs(3600))),
            rejected_rate: std::sync::atomic::AtomicU64::new(0),
            rejected_slot: std::sync::atomic::AtomicU64::new(0),
            config,
        }
    }

    /// Admit one request: window checks first, then a concurrency slot.
    ///
    /// The returned permit must be held until the request finishes; dropping
    /// it frees the slot.
    pub async fn admit(&self, estimated_tokens: u64) -> Result<SlotPermit> {
        self.check_windows(estimated_tokens)?;

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        .map_err(|_| {
            self.rejected_slot
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(
                max_concurrent = self.config.max_concurrent,
                "Concurrency slots exhausted"
            );
            GatewayError::timeout("slot acquire", self.config.acquire_timeout)
        })?
        .map_err(|_| GatewayError::rate_limited("limiter shut down"))?;

        // Count the request at admission, not completion, so a burst cannot
        // overshoot the window while calls are still in flight.
        let now = Instant::now();
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(now, 1);
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(now, estimated_tokens);

        Ok(SlotPermit { _permit: permit })
    }

    /// Record actual spend after a completed call
    pub fn record_cost(&self, cost_usd: f64) {
        if cost_usd <= 0.0 {
            return;
        }
        let micro = (cost_usd * 1_000_000.0) as u64;
        self.cost_micro
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Instant::now(), micro);
    }

    fn check_windows(&self, estimated_tokens: u64) -> Result<()> {
        let now = Instant::now();

        let requests = self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .total(now);
        if requests >= self.config.max_requests_per_minute as u64 {
            self.rejected_rate
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(GatewayError::rate_limited(format!(
                "request rate limit reached: {}/{} per minute",
                requests, self.config.max_requests_per_minute
            )));
        }

        let tokens = self
            .tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .total(now);
        if tokens + estimated_tokens > self.config.max_tokens_per_minute {
            self.rejected_rate
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(GatewayError::rate_limited(format!(
                "token rate limit reached: {} used + {} requested > {} per minute",
                tokens, estimated_tokens, self.config.max_tokens_per_minute
            )));
        }

        let cost_micro = self
            .cost_micro
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .total(now);
        let cost_usd = cost_micro as f64 / 1_000_000.0;
        if cost_usd >= self.config.max_cost_per_hour {
            self.rejected_rate
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Err(GatewayError::rate_limited(format!(
                "cost ceiling reached: ${:.4} of ${:.2} per hour",
                cost_usd, self.config.max_cost_per_hour
            )));
        }

        debug!(requests, tokens, cost_usd, "Admission windows checked");
        Ok(())
    }

    pub fn usage(&self) -> UsageStats {
        let now = Instant::now();
        UsageStats {
            in_flight: self
                .config
                .max_concurrent
                .saturating_sub(self.slots.available_permits()),
            requests_last_minute: self
                .requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .total(now),
            tokens_last_minute: self
                .tokens
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .total(now),
            cost_last_hour_usd: self
                .cost_micro
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .total(now) as f64
                / 1_000_000.0,
            rejected_rate: self
                .rejected_rate
                .load(std::sync::atomic::Ordering::Relaxed),
            rejected_slot: self
                .rejected_slot
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_concurrent: usize) -> LimiterConfig {
        LimiterConfig {
            max_concurrent,
            acquire_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_admit_within_limits() {
        let limiter = ResourceLimiter::new(config(2));
        let permit = limiter.admit(100).await.unwrap();
        assert_eq!(limiter.usage().in_flight, 1);
        drop(permit);
        assert_eq!(limiter.usage().in_flight, 0);
    }

    #[tokio::test]
    async fn test_concurrency_ceiling_never_exceeded() {
        let limiter = Arc::new(ResourceLimiter::new(config(2)));

        let _a = limiter.admit(1).await.unwrap();
        let _b = limiter.admit(1).await.unwrap();

        let result = limiter.admit(1).await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
        assert_eq!(limiter.usage().rejected_slot, 1);
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let limiter = ResourceLimiter::new(config(1));

        let permit = limiter.admit(1).await.unwrap();
        drop(permit);

        assert!(limiter.admit(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_window_rejects_before_dispatch() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_tokens_per_minute: 100,
            ..config(10)
        });

        let _permit = limiter.admit(80).await.unwrap();
        let result = limiter.admit(30).await;
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
        assert_eq!(limiter.usage().rejected_rate, 1);
    }

    #[tokio::test]
    async fn test_request_window_rejects() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_requests_per_minute: 2,
            ..config(10)
        });

        let _a = limiter.admit(1).await.unwrap();
        let _b = limiter.admit(1).await.unwrap();
        assert!(matches!(
            limiter.admit(1).await,
            Err(GatewayError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_cost_ceiling_rejects() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_cost_per_hour: 1.0,
            ..config(10)
        });

        limiter.record_cost(1.5);
        assert!(matches!(
            limiter.admit(1).await,
            Err(GatewayError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_usage_stats_reflect_activity() {
        let limiter = ResourceLimiter::new(config(5));
        let _permit = limiter.admit(250).await.unwrap();
        limiter.record_cost(0.02);

        let usage = limiter.usage();
        assert_eq!(usage.requests_last_minute, 1);
        assert_eq!(usage.tokens_last_minute, 250);
        assert!((usage.cost_last_hour_usd - 0.02).abs() < 1e-9);
    }
}
