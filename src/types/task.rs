//! Task and Provider Data Model
//!
//! Typed task requests/responses exchanged through the gateway façade, plus
//! the runtime descriptor the gateway keeps for each configured provider.
//! Context payloads stay as open-ended JSON maps so upstream callers can
//! extend them without wire changes.

use std::str::FromStr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Task Types
// =============================================================================

/// Kinds of work the gateway can dispatch to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Find items semantically similar to a query
    SimilaritySearch,
    /// Structured analysis of a payload
    Analysis,
    /// Generate suggestions for a given subject
    Suggestion,
    /// Free-form completion
    Completion,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimilaritySearch => write!(f, "similarity_search"),
            Self::Analysis => write!(f, "analysis"),
            Self::Suggestion => write!(f, "suggestion"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "similarity_search" | "search" => Ok(Self::SimilaritySearch),
            "analysis" => Ok(Self::Analysis),
            "suggestion" => Ok(Self::Suggestion),
            "completion" => Ok(Self::Completion),
            _ => Err(format!(
                "Unknown task type: {s}. Valid values: similarity_search, analysis, suggestion, completion"
            )),
        }
    }
}

// =============================================================================
// Task Request / Response
// =============================================================================

/// A unit of work submitted to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// What kind of work this is
    pub task_type: TaskType,
    /// Open-ended context payload (query text, items, options)
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Explicit provider preference; used only if the provider is eligible
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Optional cap on result size (items, suggestions)
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskRequest {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            context: Map::new(),
            preferred_provider: None,
            limit: None,
        }
    }

    /// Add a context field (builder style)
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_preference(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Structured result returned to upstream callers.
///
/// Recoverable failures surface as `success == false` with a degraded
/// payload; the gateway never raises for an exhausted provider chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Result payload (shape depends on the task type)
    pub content: Value,
    /// Open-ended metadata side channel
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Provider that produced the result ("fallback" for degraded responses)
    pub provider: String,
    /// Actual or estimated cost in USD, when known
    #[serde(default)]
    pub cost_usd: Option<f64>,
    /// Total tokens consumed, when known
    #[serde(default)]
    pub tokens: Option<u32>,
    /// Whether a live provider produced this result
    pub success: bool,
    /// Whether any fallback tier beyond the immediate chain was used
    #[serde(default)]
    pub fallback_used: bool,
}

impl TaskResponse {
    /// Successful response from a live provider
    pub fn success(content: Value, provider: impl Into<String>) -> Self {
        Self {
            content,
            metadata: Map::new(),
            provider: provider.into(),
            cost_usd: None,
            tokens: None,
            success: true,
            fallback_used: false,
        }
    }

    /// Failed response carrying the last error as metadata
    pub fn failure(error: impl std::fmt::Display) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(error.to_string()));
        Self {
            content: Value::Null,
            metadata,
            provider: "none".to_string(),
            cost_usd: None,
            tokens: None,
            success: false,
            fallback_used: true,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_usage(mut self, tokens: u32, cost_usd: f64) -> Self {
        self.tokens = Some(tokens);
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn mark_fallback(mut self) -> Self {
        self.fallback_used = true;
        self
    }
}

// =============================================================================
// Provider Descriptor
// =============================================================================

/// Provider health as observed by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl HealthStatus {
    /// Whether this provider may be attempted at all
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

/// Runtime state for one configured provider.
///
/// Created at startup and mutated for the process lifetime; never removed
/// while the gateway is running. Interior mutability keeps mutations scoped
/// to this provider only.
#[derive(Debug)]
pub struct ProviderDescriptor {
    /// Stable provider id (unique within the gateway)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Task types this provider declares support for
    pub capabilities: Vec<TaskType>,
    /// Per-model cost table (USD per 1K tokens)
    pub cost_per_1k: std::collections::HashMap<String, f64>,
    health: RwLock<HealthStatus>,
    consecutive_errors: AtomicU32,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capabilities: Vec<TaskType>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities,
            cost_per_1k: std::collections::HashMap::new(),
            health: RwLock::new(HealthStatus::Unknown),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    pub fn with_cost_table(mut self, table: std::collections::HashMap<String, f64>) -> Self {
        self.cost_per_1k = table;
        self
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }

    pub fn health(&self) -> HealthStatus {
        *self
            .health
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_health(&self, status: HealthStatus) {
        let mut health = self
            .health
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *health = status;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    /// Record a failed call; degrades health after repeated errors
    pub fn record_error(&self) -> u32 {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if errors >= 3 {
            self.set_health(HealthStatus::Degraded);
        }
        errors
    }

    /// Record a successful call; resets the error streak
    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.set_health(HealthStatus::Healthy);
    }
}

// =============================================================================
// Token Usage
// =============================================================================

/// Token usage metrics reported by a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens (prompt/context)
    pub input_tokens: u32,
    /// Output tokens (response)
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_round_trip() {
        for task in [
            TaskType::SimilaritySearch,
            TaskType::Analysis,
            TaskType::Suggestion,
            TaskType::Completion,
        ] {
            let parsed: TaskType = task.to_string().parse().unwrap();
            assert_eq!(parsed, task);
        }
        assert!("nonsense".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = TaskRequest::new(TaskType::SimilaritySearch)
            .with_context("query", Value::String("brake pads".into()))
            .with_preference("openai")
            .with_limit(5);

        assert_eq!(request.context["query"], "brake pads");
        assert_eq!(request.preferred_provider.as_deref(), Some("openai"));
        assert_eq!(request.limit, Some(5));
    }

    #[test]
    fn test_failure_response_carries_error() {
        let response = TaskResponse::failure("all providers exhausted");
        assert!(!response.success);
        assert!(response.fallback_used);
        assert_eq!(response.metadata["error"], "all providers exhausted");
    }

    #[test]
    fn test_descriptor_error_streak() {
        let descriptor =
            ProviderDescriptor::new("p1", "Provider One", vec![TaskType::Completion]);
        assert_eq!(descriptor.health(), HealthStatus::Unknown);

        descriptor.record_error();
        descriptor.record_error();
        assert_eq!(descriptor.health(), HealthStatus::Unknown);
        descriptor.record_error();
        assert_eq!(descriptor.health(), HealthStatus::Degraded);

        descriptor.record_success();
        assert_eq!(descriptor.health(), HealthStatus::Healthy);
        assert_eq!(descriptor.consecutive_errors(), 0);
    }

    #[test]
    fn test_health_usable() {
        assert!(HealthStatus::Healthy.is_usable());
        assert!(HealthStatus::Degraded.is_usable());
        assert!(HealthStatus::Unknown.is_usable());
        assert!(!HealthStatus::Unhealthy.is_usable());
    }
}
