//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Dispatch chain constants
pub mod chain {
    /// Maximum total attempts across all providers in one dispatch
    pub const MAX_TOTAL_ATTEMPTS: usize = 10;

    /// Base delay for exponential backoff between delayed attempts (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between delayed attempts (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f64 = 2.0;

    /// Per-call deadline for a single provider invocation (seconds)
    pub const CALL_DEADLINE_SECS: u64 = 60;
}

/// Circuit breaker constants
pub mod circuit_breaker {
    /// Number of consecutive failures before opening circuit
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// Duration to wait before attempting recovery (seconds)
    pub const COOLDOWN_SECS: u64 = 30;

    /// Trial requests allowed in half-open state
    pub const HALF_OPEN_MAX_REQUESTS: u32 = 1;

    /// Successes required in half-open to close the circuit
    pub const SUCCESS_THRESHOLD: u32 = 1;
}

/// Response cache constants
pub mod cache {
    /// Maximum entries in the local tier
    pub const LOCAL_CAPACITY: usize = 1000;

    /// Default entry TTL (seconds)
    pub const DEFAULT_TTL_SECS: u64 = 3600;

    /// TTL for search-class operations (seconds)
    pub const SEARCH_TTL_SECS: u64 = 300;

    /// TTL for analysis-class operations (seconds)
    pub const ANALYSIS_TTL_SECS: u64 = 1800;

    /// Fraction of the local tier evicted per LRU pass (percent)
    pub const EVICT_FRACTION_PCT: usize = 20;

    /// Interval between expiry sweeps (seconds)
    pub const SWEEP_INTERVAL_SECS: u64 = 60;
}

/// Resource limiter constants
pub mod limits {
    /// Maximum concurrent in-flight requests
    pub const MAX_CONCURRENT: usize = 10;

    /// Requests-per-minute ceiling
    pub const MAX_REQUESTS_PER_MINUTE: u32 = 60;

    /// Tokens-per-minute ceiling (estimated)
    pub const MAX_TOKENS_PER_MINUTE: u64 = 90_000;

    /// Cost-per-hour ceiling (USD)
    pub const MAX_COST_PER_HOUR: f64 = 10.0;

    /// Timeout when waiting for a concurrency slot (seconds)
    pub const ACQUIRE_TIMEOUT_SECS: u64 = 10;
}

/// Connection pool constants
pub mod pool {
    /// Minimum pooled resources kept alive
    pub const MIN_SIZE: usize = 1;

    /// Maximum pooled resources
    pub const MAX_SIZE: usize = 8;

    /// Idle resources beyond this age are reaped (seconds)
    pub const IDLE_REAP_SECS: u64 = 300;

    /// Interval between idle health checks (seconds)
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 60;

    /// Default acquire timeout (seconds)
    pub const ACQUIRE_TIMEOUT_SECS: u64 = 5;
}

/// Telemetry constants
pub mod telemetry {
    /// Completed traces retained this long before purge (hours)
    pub const TRACE_RETENTION_HOURS: u64 = 24;

    /// Bounded rolling window size per provider
    pub const SAMPLE_WINDOW_SIZE: usize = 100;

    /// Minimum interval between weight recomputes (seconds)
    pub const WEIGHT_RECOMPUTE_SECS: u64 = 10;

    /// Samples older than this are ignored for weights (seconds)
    pub const SAMPLE_RETENTION_SECS: u64 = 600;

    /// Bounded latency samples kept per (provider, task) for percentiles
    pub const LATENCY_SAMPLE_CAP: usize = 500;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}
