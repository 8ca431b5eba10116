//! Per-Provider Circuit Breaker
//!
//! The single authoritative breaker state machine for the gateway. One
//! instance exists per provider id; the dispatcher and the performance
//! monitor both consult the same registry, so there is exactly one source
//! of truth for availability.
//!
//! ## Transitions
//!
//! ```text
//! Closed --[failure_threshold consecutive failures]--> Open
//! Open --[cooldown elapsed]--> HalfOpen
//! HalfOpen --[trial success]--> Closed
//! HalfOpen --[trial failure]--> Open (cooldown restarts)
//! ```

use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::constants::circuit_breaker as cb_constants;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation - requests flow through
    Closed,
    /// Provider is failing - requests rejected immediately
    Open,
    /// Testing recovery - a bounded number of trial requests allowed
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub cooldown: Duration,
    /// Trial requests allowed while half-open
    pub half_open_max_requests: u32,
    /// Successes in half-open required to close the circuit
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: cb_constants::FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(cb_constants::COOLDOWN_SECS),
            half_open_max_requests: cb_constants::HALF_OPEN_MAX_REQUESTS,
            success_threshold: cb_constants::SUCCESS_THRESHOLD,
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            ..Default::default()
        }
    }
}

/// All mutable breaker state lives in one struct so transitions stay atomic
/// under a single lock.
#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    half_open_requests: u32,
    opened_at: Option<Instant>,
    blocked_count: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_requests: 0,
            opened_at: None,
            blocked_count: 0,
        }
    }
}

/// Thread-safe circuit breaker for one provider.
pub struct CircuitBreaker {
    config: BreakerConfig,
    provider_id: String,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            config,
            provider_id: provider_id.into(),
            inner: RwLock::new(BreakerInner::new()),
        }
    }

    pub fn with_defaults(provider_id: impl Into<String>) -> Self {
        Self::new(provider_id, BreakerConfig::default())
    }

    /// Current state, applying any due open → half-open transition
    pub fn state(&self) -> BreakerState {
        self.check_cooldown();

        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state
    }

    /// Check if a request should be allowed through.
    ///
    /// Half-open admits up to `half_open_max_requests` trial calls; open
    /// rejects everything until the cooldown elapses.
    pub fn allow_request(&self) -> bool {
        self.check_cooldown();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                inner.blocked_count += 1;
                tracing::debug!(provider = %self.provider_id, "Breaker open, request blocked");
                false
            }
            BreakerState::HalfOpen => {
                if inner.half_open_requests < self.config.half_open_max_requests {
                    inner.half_open_requests += 1;
                    tracing::debug!(
                        provider = %self.provider_id,
                        trial = inner.half_open_requests,
                        max = self.config.half_open_max_requests,
                        "Breaker half-open, allowing trial request"
                    );
                    true
                } else {
                    inner.blocked_count += 1;
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        inner.failure_count = 0;

        if inner.state == BreakerState::HalfOpen {
            inner.success_count += 1;

            if inner.success_count >= self.config.success_threshold {
                inner.state = BreakerState::Closed;
                inner.success_count = 0;
                inner.half_open_requests = 0;
                inner.opened_at = None;

                tracing::info!(provider = %self.provider_id, "Breaker closed, provider recovered");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        inner.success_count = 0;

        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;

                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_requests = 0;

                    tracing::warn!(
                        provider = %self.provider_id,
                        failures = self.config.failure_threshold,
                        cooldown = ?self.config.cooldown,
                        "Breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // Any failure during a trial reopens immediately
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_requests = 0;
                inner.failure_count = 0;

                tracing::warn!(
                    provider = %self.provider_id,
                    "Breaker reopened after failed trial"
                );
            }
            BreakerState::Open => {}
        }
    }

    /// Snapshot for monitoring
    pub fn stats(&self) -> BreakerStats {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        BreakerStats {
            provider_id: self.provider_id.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            blocked_count: inner.blocked_count,
            time_in_state: inner.opened_at.map(|t| t.elapsed()),
        }
    }

    /// Force reset to closed (manual intervention)
    pub fn reset(&self) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        *inner = BreakerInner {
            blocked_count: inner.blocked_count,
            ..BreakerInner::new()
        };

        tracing::info!(provider = %self.provider_id, "Breaker manually reset");
    }

    /// Apply open → half-open when the cooldown has elapsed
    pub(crate) fn check_cooldown(&self) {
        let due = {
            let inner = self
                .inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            inner.state == BreakerState::Open
                && inner
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.cooldown)
        };

        if due {
            let mut inner = self
                .inner
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            // State may have changed between the read and write locks
            if inner.state == BreakerState::Open {
                inner.state = BreakerState::HalfOpen;
                inner.half_open_requests = 0;
                inner.success_count = 0;

                tracing::info!(provider = %self.provider_id, "Breaker half-open, testing recovery");
            }
        }
    }
}

/// Monitoring snapshot of one breaker
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub provider_id: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub blocked_count: u64,
    pub time_in_state: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(threshold: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            cooldown: Duration::from_millis(1),
            half_open_max_requests: 1,
            success_threshold: 1,
        }
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = CircuitBreaker::with_defaults("test");
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", quick_config(3));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", quick_config(3));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_single_trial_then_close() {
        let breaker = CircuitBreaker::new("test", quick_config(1));

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Exactly one trial is admitted
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let breaker = CircuitBreaker::new("test", quick_config(1));

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_blocked_count() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );

        breaker.record_failure();
        assert!(!breaker.allow_request());
        assert!(!breaker.allow_request());
        assert!(!breaker.allow_request());

        assert_eq!(breaker.stats().blocked_count, 3);
    }

    #[test]
    fn test_manual_reset() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.allow_request());
    }
}
