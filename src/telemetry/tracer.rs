//! Request Tracing
//!
//! In-memory trace store keyed by correlation id. Every dispatched task
//! gets a trace; each provider attempt, cache lookup, and fallback step
//! appends a span. Traces are queryable by correlation id or caller id and
//! are purged after the retention window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::constants::telemetry as telemetry_constants;
use crate::types::CorrelationId;

/// Terminal state of one span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Started,
    Completed,
    Failed,
    Timeout,
}

/// One recorded step within a trace
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub id: String,
    /// Enclosing span, when this step ran inside another
    pub parent: Option<String>,
    pub name: String,
    pub provider: Option<String>,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Free-form detail, e.g. the error message for failed spans
    pub detail: Option<String>,
}

impl SpanRecord {
    pub fn new(name: impl Into<String>, status: SpanStatus, duration_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent: None,
            name: name.into(),
            provider: None,
            status,
            started_at: Utc::now(),
            duration_ms,
            detail: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// All spans recorded for one request
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub correlation_id: String,
    pub caller_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub spans: Vec<SpanRecord>,
}

impl Trace {
    /// Whether any span failed or timed out
    pub fn has_failures(&self) -> bool {
        self.spans
            .iter()
            .any(|s| matches!(s.status, SpanStatus::Failed | SpanStatus::Timeout))
    }

    /// Total recorded time across spans
    pub fn total_duration_ms(&self) -> u64 {
        self.spans.iter().map(|s| s.duration_ms).sum()
    }
}

/// Concurrent trace store with time-based retention
pub struct Tracer {
    traces: DashMap<String, Trace>,
    retention: ChronoDuration,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(telemetry_constants::TRACE_RETENTION_HOURS as i64)
    }
}

impl Tracer {
    pub fn new(retention_hours: i64) -> Self {
        Self {
            traces: DashMap::new(),
            retention: ChronoDuration::hours(retention_hours.max(1)),
        }
    }

    /// Open a trace for a new request
    pub fn begin(&self, correlation_id: &CorrelationId, caller_id: Option<String>) {
        self.traces.insert(
            correlation_id.as_str().to_string(),
            Trace {
                correlation_id: correlation_id.as_str().to_string(),
                caller_id,
                started_at: Utc::now(),
                spans: Vec::new(),
            },
        );
    }

    /// Append a completed span to an open trace; unknown ids are ignored
    pub fn record(&self, correlation_id: &CorrelationId, span: SpanRecord) {
        if let Some(mut trace) = self.traces.get_mut(correlation_id.as_str()) {
            trace.spans.push(span);
        }
    }

    /// Open a span whose duration is not yet known.
    ///
    /// Returns the span id for [`Tracer::finish_span`], or `None` when the
    /// trace does not exist.
    pub fn start_span(
        &self,
        correlation_id: &CorrelationId,
        name: impl Into<String>,
        parent: Option<&str>,
    ) -> Option<String> {
        let mut trace = self.traces.get_mut(correlation_id.as_str())?;
        let mut span = SpanRecord::new(name, SpanStatus::Started, 0);
        if let Some(parent) = parent {
            span = span.with_parent(parent);
        }
        let span_id = span.id.clone();
        trace.spans.push(span);
        Some(span_id)
    }

    /// Close an open span: computes its duration and sets terminal status
    pub fn finish_span(
        &self,
        correlation_id: &CorrelationId,
        span_id: &str,
        status: SpanStatus,
        detail: Option<String>,
    ) {
        if let Some(mut trace) = self.traces.get_mut(correlation_id.as_str())
            && let Some(span) = trace.spans.iter_mut().find(|s| s.id == span_id)
        {
            span.duration_ms = (Utc::now() - span.started_at).num_milliseconds().max(0) as u64;
            span.status = status;
            span.detail = detail;
        }
    }

    pub fn get(&self, correlation_id: &CorrelationId) -> Option<Trace> {
        self.traces
            .get(correlation_id.as_str())
            .map(|t| t.clone())
    }

    /// All traces recorded for a caller, newest first
    pub fn by_caller(&self, caller_id: &str) -> Vec<Trace> {
        let mut traces: Vec<Trace> = self
            .traces
            .iter()
            .filter(|t| t.caller_id.as_deref() == Some(caller_id))
            .map(|t| t.clone())
            .collect();
        traces.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        traces
    }

    /// Drop traces older than the retention window
    pub fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let before = self.traces.len();
        self.traces.retain(|_, trace| trace.started_at >= cutoff);
        before.saturating_sub(self.traces.len())
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}
