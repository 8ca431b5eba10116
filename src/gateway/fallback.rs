//! Fallback Strategy Pipeline
//!
//! Ordered recovery tiers tried when the primary dispatch path fails. The
//! pipeline is monotonic: the first strategy that yields a successful
//! response wins and later tiers are never invoked. The final tier is
//! provider-free and deterministic, so callers always receive a
//! structurally valid response even with every backend down.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::dispatch::{DispatchPacing, Dispatcher};
use crate::cache::ResponseCache;
use crate::telemetry::{SpanRecord, SpanStatus, Telemetry};
use crate::types::{CorrelationId, GatewayError, TaskRequest, TaskResponse, TaskType};

/// Maximum characters kept per string field when simplifying a request
const SIMPLIFIED_MAX_CHARS: usize = 500;
/// Maximum array elements kept when simplifying a request
const SIMPLIFIED_MAX_ITEMS: usize = 10;

/// One recovery tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Run the chain once, no pacing
    Immediate,
    /// Run the chain with exponential backoff between attempts
    Delayed,
    /// Serve a cached response; on miss, run the chain and cache the result
    Cached,
    /// Run the chain with a truncated context
    Simplified,
    /// Deterministic provider-free heuristic response
    GracefulDegradation,
}

impl FallbackStrategy {
    /// Default escalation order
    pub fn default_order() -> Vec<Self> {
        vec![
            Self::Immediate,
            Self::Delayed,
            Self::Cached,
            Self::Simplified,
            Self::GracefulDegradation,
        ]
    }
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
            Self::Cached => "cached",
            Self::Simplified => "simplified",
            Self::GracefulDegradation => "graceful_degradation",
        };
        write!(f, "{name}")
    }
}

impl FromStr for FallbackStrategy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "delayed" => Ok(Self::Delayed),
            "cached" => Ok(Self::Cached),
            "simplified" => Ok(Self::Simplified),
            "graceful_degradation" => Ok(Self::GracefulDegradation),
            other => Err(GatewayError::Config(format!(
                "Unknown fallback strategy: {other}"
            ))),
        }
    }
}

/// Escalates through recovery tiers until one produces a response
pub struct FallbackManager {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<ResponseCache>,
    strategies: Vec<FallbackStrategy>,
    telemetry: Telemetry,
}

impl FallbackManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        cache: Arc<ResponseCache>,
        strategies: Vec<FallbackStrategy>,
        telemetry: Telemetry,
    ) -> Self {
        let strategies = if strategies.is_empty() {
            FallbackStrategy::default_order()
        } else {
            strategies
        };
        Self {
            dispatcher,
            cache,
            strategies,
            telemetry,
        }
    }

    /// Run the pipeline. Always returns a response; recoverable failures
    /// surface as `success == false`, never as an error.
    ///
    /// Tier spans nest under `parent` when the caller opened a root span.
    pub async fn execute(
        &self,
        request: &TaskRequest,
        correlation: &CorrelationId,
        parent: Option<&str>,
    ) -> TaskResponse {
        let mut last_error: Option<GatewayError> = None;

        for (tier, strategy) in self.strategies.iter().enumerate() {
            let started = Instant::now();
            debug!(%strategy, tier, "Trying fallback tier");

            let outcome = match strategy {
                FallbackStrategy::Immediate => {
                    self.dispatch_tier(request, correlation, DispatchPacing::Immediate)
                        .await
                }
                FallbackStrategy::Delayed => {
                    self.dispatch_tier(request, correlation, DispatchPacing::Paced)
                        .await
                }
                FallbackStrategy::Cached => self.cached_tier(request, correlation).await,
                FallbackStrategy::Simplified => {
                    let simplified = simplify_request(request);
                    self.dispatch_tier(&simplified, correlation, DispatchPacing::Immediate)
                        .await
                        .map(|r| r.with_metadata("simplified", Value::Bool(true)))
                }
                FallbackStrategy::GracefulDegradation => Ok(degraded_response(request)),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) => {
                    self.record_tier_span(
                        correlation,
                        parent,
                        SpanRecord::new(
                            format!("fallback_{strategy}"),
                            SpanStatus::Completed,
                            elapsed_ms,
                        ),
                    );
                    if tier > 0 {
                        info!(%strategy, tier, "Fallback tier succeeded");
                        return response.mark_fallback();
                    }
                    return response;
                }
                Err(err) => {
                    self.record_tier_span(
                        correlation,
                        parent,
                        SpanRecord::new(
                            format!("fallback_{strategy}"),
                            SpanStatus::Failed,
                            elapsed_ms,
                        )
                        .with_detail(err.to_string()),
                    );
                    warn!(%strategy, error = %err, "Fallback tier failed");
                    last_error = Some(err);
                }
            }
        }

        let exhausted = GatewayError::ExhaustedFallback(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no fallback strategies configured".to_string()),
        );
        TaskResponse::failure(exhausted)
    }

    fn record_tier_span(
        &self,
        correlation: &CorrelationId,
        parent: Option<&str>,
        mut span: SpanRecord,
    ) {
        if let Some(parent) = parent {
            span = span.with_parent(parent);
        }
        self.telemetry.tracer.record(correlation, span);
    }

    async fn dispatch_tier(
        &self,
        request: &TaskRequest,
        correlation: &CorrelationId,
        pacing: DispatchPacing,
    ) -> crate::types::Result<TaskResponse> {
        let response = self.dispatcher.dispatch(request, correlation, pacing).await?;

        // Successful results feed the cached tier of future requests
        self.cache.set(request, &response.content);

        Ok(TaskResponse::success(response.content, response.provider)
            .with_usage(response.usage.total(), response.cost_usd)
            .with_metadata("model", Value::String(response.model))
            .with_metadata(
                "latency_ms",
                Value::Number(response.latency_ms.into()),
            ))
    }

    async fn cached_tier(
        &self,
        request: &TaskRequest,
        correlation: &CorrelationId,
    ) -> crate::types::Result<TaskResponse> {
        if let Some(content) = self.cache.get(request) {
            debug!("Serving cached response");
            return Ok(TaskResponse::success(content, "cache")
                .with_metadata("cached", Value::Bool(true)));
        }

        self.dispatch_tier(request, correlation, DispatchPacing::Immediate)
            .await
    }
}

/// Truncate context strings and arrays to cut cost and failure surface
fn simplify_request(request: &TaskRequest) -> TaskRequest {
    let mut simplified = TaskRequest::new(request.task_type);
    simplified.preferred_provider = request.preferred_provider.clone();
    simplified.limit = request.limit.map(|n| n.min(SIMPLIFIED_MAX_ITEMS));

    for (key, value) in &request.context {
        simplified
            .context
            .insert(key.clone(), simplify_value(value));
    }
    simplified
}

fn simplify_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > SIMPLIFIED_MAX_CHARS => {
            Value::String(s.chars().take(SIMPLIFIED_MAX_CHARS).collect())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(SIMPLIFIED_MAX_ITEMS)
                .map(simplify_value)
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), simplify_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Deterministic provider-free response.
///
/// Similarity search falls back to case-insensitive substring matching over
/// any candidate list present in the context; other task types return an
/// empty but structurally valid payload. `success` stays false so callers
/// can distinguish degraded output from a real provider result.
fn degraded_response(request: &TaskRequest) -> TaskResponse {
    let content = match request.task_type {
        TaskType::SimilaritySearch => {
            let matches = keyword_matches(&request.context, request.limit);
            json!({ "matches": matches })
        }
        TaskType::Analysis => json!({ "analysis": {} }),
        TaskType::Suggestion => json!({ "suggestions": [] }),
        TaskType::Completion => json!({ "completion": "" }),
    };

    let mut response = TaskResponse::success(content, "degraded")
        .with_metadata("degraded", Value::Bool(true))
        .mark_fallback();
    response.success = false;
    response
}

/// Case-insensitive substring match of the query against candidate strings
fn keyword_matches(context: &Map<String, Value>, limit: Option<usize>) -> Vec<Value> {
    let query = match context.get("query").and_then(Value::as_str) {
        Some(q) if !q.is_empty() => q.to_lowercase(),
        _ => return Vec::new(),
    };

    let candidates = match context.get("candidates").and_then(Value::as_array) {
        Some(items) => items,
        None => return Vec::new(),
    };

    let mut matches: Vec<Value> = candidates
        .iter()
        .filter(|candidate| {
            candidate_text(candidate)
                .map(|text| {
                    let lower = text.to_lowercase();
                    query
                        .split_whitespace()
                        .any(|word| lower.contains(word))
                })
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    if let Some(n) = limit {
        matches.truncate(n);
    }
    matches
}

fn candidate_text(candidate: &Value) -> Option<String> {
    match candidate {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("name")
            .or_else(|| map.get("title"))
            .or_else(|| map.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::dispatch::tests::{MockProvider, dispatcher_with, mock_entry};
    use crate::gateway::dispatch::DispatchConfig;
    use crate::types::ErrorCategory;
    use std::sync::atomic::Ordering;

    fn manager(
        dispatcher: Dispatcher,
        strategies: Vec<FallbackStrategy>,
    ) -> (FallbackManager, Arc<ResponseCache>) {
        let cache = Arc::new(ResponseCache::default());
        (
            FallbackManager::new(
                Arc::new(dispatcher),
                Arc::clone(&cache),
                strategies,
                Telemetry::default(),
            ),
            cache,
        )
    }

    fn quick_config() -> DispatchConfig {
        DispatchConfig {
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_primary_success_is_not_marked_fallback() {
        let provider = Arc::new(MockProvider::reliable("primary"));
        let dispatcher = dispatcher_with(vec![mock_entry(Arc::clone(&provider))], quick_config());
        let (manager, _) = manager(dispatcher, FallbackStrategy::default_order());

        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        let response = manager.execute(&request, &CorrelationId::generate(), None).await;

        assert!(response.success);
        assert!(!response.fallback_used);
        assert_eq!(response.provider, "primary");
    }

    #[tokio::test]
    async fn test_monotonic_stops_at_first_success() {
        let flaky = Arc::new(MockProvider {
            id: "flaky".to_string(),
            calls: std::sync::atomic::AtomicU32::new(0),
            failures_before_success: 1,
            category: ErrorCategory::Unavailable,
        });
        let dispatcher = dispatcher_with(vec![mock_entry(Arc::clone(&flaky))], quick_config());
        let (manager, _) = manager(
            dispatcher,
            vec![
                FallbackStrategy::Immediate,
                FallbackStrategy::Delayed,
                FallbackStrategy::Cached,
            ],
        );

        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        let response = manager.execute(&request, &CorrelationId::generate(), None).await;

        // Immediate tier fails once, Delayed tier succeeds; Cached never runs
        assert!(response.success);
        assert!(response.fallback_used);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_tier_serves_prior_response() {
        let down = Arc::new(MockProvider::failing("down", ErrorCategory::Unavailable));
        let dispatcher = dispatcher_with(vec![mock_entry(down)], quick_config());
        let (manager, cache) = manager(
            dispatcher,
            vec![FallbackStrategy::Immediate, FallbackStrategy::Cached],
        );

        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        cache.set(&request, &json!({"analysis": {"cached": true}}));

        let response = manager.execute(&request, &CorrelationId::generate(), None).await;

        assert!(response.success);
        assert!(response.fallback_used);
        assert_eq!(response.provider, "cache");
        assert_eq!(response.content["analysis"]["cached"], true);
    }

    #[tokio::test]
    async fn test_all_tiers_down_returns_degraded_not_error() {
        let down = Arc::new(MockProvider::failing("down", ErrorCategory::Unavailable));
        let dispatcher = dispatcher_with(vec![mock_entry(down)], quick_config());
        let (manager, _) = manager(dispatcher, FallbackStrategy::default_order());

        let request = TaskRequest::new(TaskType::Suggestion).with_context("q", json!("x"));
        let response = manager.execute(&request, &CorrelationId::generate(), None).await;

        assert!(!response.success);
        assert!(response.fallback_used);
        assert_eq!(response.provider, "degraded");
        assert_eq!(response.content["suggestions"], json!([]));
    }

    #[tokio::test]
    async fn test_exhausted_without_degradation_is_failure_response() {
        let down = Arc::new(MockProvider::failing("down", ErrorCategory::Unavailable));
        let dispatcher = dispatcher_with(vec![mock_entry(down)], quick_config());
        let (manager, _) = manager(dispatcher, vec![FallbackStrategy::Immediate]);

        let request = TaskRequest::new(TaskType::Analysis);
        let response = manager.execute(&request, &CorrelationId::generate(), None).await;

        assert!(!response.success);
        assert!(response.fallback_used);
        assert!(response.metadata.contains_key("error"));
    }

    #[test]
    fn test_degraded_similarity_search_matches_substrings() {
        let request = TaskRequest::new(TaskType::SimilaritySearch)
            .with_context("query", json!("brake pads"))
            .with_context(
                "candidates",
                json!(["Brake pad set", "Oil filter", {"name": "Ceramic brake pads"}]),
            )
            .with_limit(5);

        let response = degraded_response(&request);
        let matches = response.content["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert!(!response.success);
    }

    #[test]
    fn test_simplify_truncates_strings_and_arrays() {
        let request = TaskRequest::new(TaskType::Analysis)
            .with_context("text", json!("x".repeat(2000)))
            .with_context("items", json!(vec![1; 100]));

        let simplified = simplify_request(&request);
        assert_eq!(
            simplified.context["text"].as_str().unwrap().len(),
            SIMPLIFIED_MAX_CHARS
        );
        assert_eq!(
            simplified.context["items"].as_array().unwrap().len(),
            SIMPLIFIED_MAX_ITEMS
        );
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "delayed".parse::<FallbackStrategy>().unwrap(),
            FallbackStrategy::Delayed
        );
        assert!("bogus".parse::<FallbackStrategy>().is_err());
    }
}
