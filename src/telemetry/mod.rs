//! Observability
//!
//! Request tracing and metrics collection for the gateway. Both stores are
//! in-memory and bounded: traces age out after a retention window, latency
//! samples are capped per provider.
//!
//! ## Modules
//!
//! - `tracer`: correlation-id keyed trace store
//! - `metrics`: per-provider counters and latency distributions

pub mod metrics;
pub mod tracer;

pub use metrics::{
    LatencySummary, MetricsCollector, MetricsSummary, MetricsVerdict, ProviderMetrics,
};
pub use tracer::{SpanRecord, SpanStatus, Trace, Tracer};

use std::sync::Arc;

/// Bundled telemetry handles shared across gateway components
#[derive(Clone)]
pub struct Telemetry {
    pub tracer: Arc<Tracer>,
    pub metrics: Arc<MetricsCollector>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            tracer: Arc::new(Tracer::default()),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

impl Telemetry {
    pub fn with_retention(retention_hours: i64) -> Self {
        Self {
            tracer: Arc::new(Tracer::new(retention_hours)),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Periodic housekeeping: drop traces past retention
    pub fn purge(&self) -> usize {
        self.tracer.purge_expired()
    }
}
