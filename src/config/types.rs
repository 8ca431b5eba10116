//! Configuration Types
//!
//! All configuration structures with sensible defaults. Every section maps
//! onto the runtime config of one gateway subsystem; conversion helpers keep
//! serde-friendly primitives here and `Duration`s in the subsystem structs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::TtlPolicy;
use crate::constants;
use crate::gateway::{DispatchConfig, FallbackStrategy, MonitorConfig};
use crate::limits::LimiterConfig;
use crate::provider::{BreakerConfig, ProviderSettings};
use crate::types::{GatewayError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Configuration version
    pub version: String,

    /// Master switch; a disabled gateway refuses to start
    pub enabled: bool,

    /// Configured provider backends, in declaration order
    pub providers: Vec<ProviderSettings>,

    /// Admission control ceilings
    pub limits: LimitsSection,

    /// Response cache tiers and TTLs
    pub cache: CacheSection,

    /// Chain execution and circuit breaker tuning
    pub dispatch: DispatchSection,

    /// Fallback tier order
    pub fallback: FallbackSection,

    /// Tracing and adaptive-weight tuning
    pub telemetry: TelemetrySection,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            enabled: true,
            providers: Vec::new(),
            limits: LimitsSection::default(),
            cache: CacheSection::default(),
            dispatch: DispatchSection::default(),
            fallback: FallbackSection::default(),
            telemetry: TelemetrySection::default(),
        }
    }
}

impl GatewayConfig {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `GatewayError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.providers.is_empty() {
            return Err(GatewayError::Config(
                "At least one provider must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for settings in &self.providers {
            if !seen.insert(settings.provider_id()) {
                return Err(GatewayError::Config(format!(
                    "Duplicate provider id: {}",
                    settings.provider_id()
                )));
            }
        }

        if self.limits.max_concurrent == 0 {
            return Err(GatewayError::Config(
                "limits.max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.limits.max_cost_per_hour < 0.0 {
            return Err(GatewayError::Config(format!(
                "limits.max_cost_per_hour must not be negative, got {}",
                self.limits.max_cost_per_hour
            )));
        }

        if self.cache.local_capacity == 0 {
            return Err(GatewayError::Config(
                "cache.local_capacity must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.max_total_attempts == 0 {
            return Err(GatewayError::Config(
                "dispatch.max_total_attempts must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.breaker_failure_threshold == 0 {
            return Err(GatewayError::Config(
                "dispatch.breaker_failure_threshold must be greater than 0".to_string(),
            ));
        }

        // Strategies must parse; order is the caller's business
        self.fallback.parsed()?;

        Ok(())
    }
}

// =============================================================================
// Limits Section
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Maximum concurrent in-flight requests
    pub max_concurrent: usize,

    /// Requests admitted per rolling minute
    pub max_requests_per_minute: u32,

    /// Estimated tokens admitted per rolling minute
    pub max_tokens_per_minute: u64,

    /// Recorded spend admitted per rolling hour (USD)
    pub max_cost_per_hour: f64,

    /// Seconds to wait for a concurrency slot
    pub acquire_timeout_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_concurrent: constants::limits::MAX_CONCURRENT,
            max_requests_per_minute: constants::limits::MAX_REQUESTS_PER_MINUTE,
            max_tokens_per_minute: constants::limits::MAX_TOKENS_PER_MINUTE,
            max_cost_per_hour: constants::limits::MAX_COST_PER_HOUR,
            acquire_timeout_secs: constants::limits::ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl LimitsSection {
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            max_concurrent: self.max_concurrent,
            max_requests_per_minute: self.max_requests_per_minute,
            max_tokens_per_minute: self.max_tokens_per_minute,
            max_cost_per_hour: self.max_cost_per_hour,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

// =============================================================================
// Cache Section
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Maximum entries in the in-process tier
    pub local_capacity: usize,

    /// Sqlite file for the cross-process tier; omit to run local-only
    pub shared_path: Option<PathBuf>,

    /// Default entry TTL (seconds)
    pub default_ttl_secs: u64,

    /// TTL for search results (seconds)
    pub search_ttl_secs: u64,

    /// TTL for analysis results (seconds)
    pub analysis_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            local_capacity: constants::cache::LOCAL_CAPACITY,
            shared_path: None,
            default_ttl_secs: constants::cache::DEFAULT_TTL_SECS,
            search_ttl_secs: constants::cache::SEARCH_TTL_SECS,
            analysis_ttl_secs: constants::cache::ANALYSIS_TTL_SECS,
        }
    }
}

impl CacheSection {
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            default: Duration::from_secs(self.default_ttl_secs),
            search: Duration::from_secs(self.search_ttl_secs),
            analysis: Duration::from_secs(self.analysis_ttl_secs),
        }
    }
}

// =============================================================================
// Dispatch Section
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Attempts across all providers before giving up
    pub max_total_attempts: usize,

    /// Retries against one provider before moving down the chain
    pub max_retries_per_provider: u32,

    /// Base delay for paced backoff (milliseconds)
    pub base_delay_ms: u64,

    /// Backoff ceiling (seconds)
    pub max_delay_secs: u64,

    /// Deadline for a single provider call (seconds)
    pub call_deadline_secs: u64,

    /// Consecutive failures before a breaker opens
    pub breaker_failure_threshold: u32,

    /// Seconds an open breaker waits before a half-open trial
    pub breaker_cooldown_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_total_attempts: constants::chain::MAX_TOTAL_ATTEMPTS,
            max_retries_per_provider: 2,
            base_delay_ms: constants::chain::BASE_DELAY_MS,
            max_delay_secs: constants::chain::MAX_DELAY_SECS,
            call_deadline_secs: constants::chain::CALL_DEADLINE_SECS,
            breaker_failure_threshold: constants::circuit_breaker::FAILURE_THRESHOLD,
            breaker_cooldown_secs: constants::circuit_breaker::COOLDOWN_SECS,
        }
    }
}

impl DispatchSection {
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_total_attempts: self.max_total_attempts,
            max_retries_per_provider: self.max_retries_per_provider,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            call_deadline: Duration::from_secs(self.call_deadline_secs),
            breaker: BreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                cooldown: Duration::from_secs(self.breaker_cooldown_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

// =============================================================================
// Fallback Section
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    /// Recovery tiers tried in order after the primary chain fails
    pub strategies: Vec<String>,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            strategies: FallbackStrategy::default_order()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FallbackSection {
    /// Parse the configured strategy names
    pub fn parsed(&self) -> Result<Vec<FallbackStrategy>> {
        self.strategies.iter().map(|s| s.parse()).collect()
    }
}

// =============================================================================
// Telemetry Section
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// Completed traces retained this long before purge (hours)
    pub trace_retention_hours: u64,

    /// Rolling samples kept per provider for weight computation
    pub sample_window_size: usize,

    /// Minimum interval between weight recomputations (seconds)
    pub weight_recompute_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            trace_retention_hours: constants::telemetry::TRACE_RETENTION_HOURS,
            sample_window_size: constants::telemetry::SAMPLE_WINDOW_SIZE,
            weight_recompute_secs: constants::telemetry::WEIGHT_RECOMPUTE_SECS,
        }
    }
}

impl TelemetrySection {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            window_size: self.sample_window_size,
            recompute_interval: Duration::from_secs(self.weight_recompute_secs),
            ..Default::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
