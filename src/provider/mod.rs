//! Completion Provider Abstraction
//!
//! Defines the `Provider` trait implemented by every external AI-completion
//! backend. Providers declare capabilities per task type and return a
//! `ProviderResponse` with token usage for cost tracking.
//!
//! ## Modules
//!
//! - `circuit_breaker`: the single authoritative per-provider breaker
//! - `openai`: OpenAI-compatible chat-completions backend
//! - `ollama`: local Ollama backend

pub mod circuit_breaker;
mod ollama;
mod openai;

pub use circuit_breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::network as network_constants;
use crate::limits::pool::{PoolConfig, ResourceFactory, ResourcePool};
use crate::tokenizer::estimate_context_tokens;
use crate::types::{
    GatewayError, ProviderDescriptor, Result, TaskRequest, TaskType, TokenUsage,
};

// =============================================================================
// HTTP Connection Pool
// =============================================================================

/// Builds HTTP clients for the pool shared by every provider backend.
///
/// Clients carry only the connect timeout; per-request deadlines are set by
/// each provider from its own settings.
pub struct HttpConnectionFactory;

#[async_trait]
impl ResourceFactory for HttpConnectionFactory {
    type Resource = reqwest::Client;

    async fn create(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(
                network_constants::CONNECTION_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))
    }

    async fn is_healthy(&self, _client: &reqwest::Client) -> bool {
        // Clients never go stale on their own; maintenance reaps by idle age
        true
    }
}

/// Shared pool of HTTP clients backing all provider traffic
pub type HttpPool = ResourcePool<HttpConnectionFactory>;

/// Pool with default sizing for process-lifetime use
pub fn default_http_pool() -> HttpPool {
    ResourcePool::new(HttpConnectionFactory, PoolConfig::default())
}

// =============================================================================
// Provider Response
// =============================================================================

/// Raw result of one provider call, before gateway normalization
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Generated content (structured JSON)
    pub content: Value,
    /// Token usage reported or estimated by the provider
    pub usage: TokenUsage,
    /// Actual cost in USD when the provider reports one
    pub cost_usd: f64,
    /// Wall-clock latency of the call in milliseconds
    pub latency_ms: u64,
    /// Model that served the call
    pub model: String,
    /// Provider id
    pub provider: String,
}

impl ProviderResponse {
    /// Response with content only (usage/cost unknown)
    pub fn content_only(content: Value, provider: impl Into<String>) -> Self {
        Self {
            content,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            latency_ms: 0,
            model: String::new(),
            provider: provider.into(),
        }
    }
}

// =============================================================================
// Provider Settings
// =============================================================================

fn default_max_tokens() -> usize {
    4096
}

fn default_capabilities() -> Vec<TaskType> {
    vec![
        TaskType::SimilaritySearch,
        TaskType::Analysis,
        TaskType::Suggestion,
        TaskType::Completion,
    ]
}

/// Configuration for one provider backend.
///
/// API keys are never serialized to output and are redacted in debug
/// output; each provider converts the key to a SecretString internally.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Backend kind: "openai" or "ollama"
    pub kind: String,
    /// Unique provider id (defaults to the kind)
    #[serde(default)]
    pub id: Option<String>,
    /// Model name (backend-specific)
    #[serde(default)]
    pub model: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "ProviderSettings::default_timeout")]
    pub timeout_secs: u64,
    /// API key; never serialized back out
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// API base URL (for custom endpoints)
    #[serde(default)]
    pub api_base: Option<String>,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Task types this provider may serve
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<TaskType>,
    /// Cost table: USD per 1K tokens keyed by model name
    #[serde(default)]
    pub cost_per_1k: HashMap<String, f64>,
}

impl ProviderSettings {
    fn default_timeout() -> u64 {
        crate::constants::network::DEFAULT_TIMEOUT_SECS
    }

    /// Effective provider id
    pub fn provider_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.kind.clone())
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
            id: None,
            model: None,
            timeout_secs: Self::default_timeout(),
            api_key: None,
            api_base: None,
            max_tokens: default_max_tokens(),
            capabilities: default_capabilities(),
            cost_per_1k: HashMap::new(),
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Shared provider handle for concurrent access across gateway components
pub type SharedProvider = Arc<dyn Provider + Send + Sync>;

/// External AI-completion backend.
///
/// Implementations are selected at runtime by the policy engine; the gateway
/// never depends on a concrete backend type.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Execute one task against this backend.
    ///
    /// Implementations must populate token usage when the backend reports it.
    async fn execute(&self, request: &TaskRequest) -> Result<ProviderResponse>;

    /// Provider id for logging and routing
    fn name(&self) -> &str;

    /// Model currently in use
    fn model(&self) -> &str;

    /// Task types this backend declares support for
    fn capabilities(&self) -> &[TaskType];

    /// Estimate the USD cost of serving `request`.
    ///
    /// Returns [`GatewayError::Estimation`] when no cost table entry exists;
    /// the policy engine sorts such providers last rather than excluding them.
    fn estimate_cost(&self, request: &TaskRequest) -> Result<f64> {
        let _ = request;
        Err(GatewayError::Estimation {
            provider: self.name().to_string(),
            reason: "no cost table".to_string(),
        })
    }

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Estimate cost from a per-1K-token rate and the request context size
pub(crate) fn cost_from_rate(request: &TaskRequest, rate_per_1k: f64) -> f64 {
    let tokens = estimate_context_tokens(&request.context) as f64;
    tokens / 1000.0 * rate_per_1k
}

// =============================================================================
// Registry Entry & Factory
// =============================================================================

/// A provider paired with its runtime descriptor.
///
/// The descriptor lives for the process lifetime and partitions mutable
/// health state per provider id.
#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: SharedProvider,
    pub descriptor: Arc<ProviderDescriptor>,
}

impl ProviderEntry {
    pub fn new(provider: SharedProvider, descriptor: ProviderDescriptor) -> Self {
        Self {
            provider,
            descriptor: Arc::new(descriptor),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Create a provider backend from settings
pub fn create_provider(settings: &ProviderSettings, http: HttpPool) -> Result<SharedProvider> {
    match settings.kind.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(settings.clone(), http)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(settings.clone(), http)?)),
        _ => Err(GatewayError::Config(format!(
            "Unknown provider kind: {}. Supported: openai, ollama",
            settings.kind
        ))),
    }
}

/// Create a provider together with its startup descriptor
pub fn build_entry(settings: &ProviderSettings, http: &HttpPool) -> Result<ProviderEntry> {
    let provider = create_provider(settings, http.clone())?;
    let descriptor = ProviderDescriptor::new(
        settings.provider_id(),
        settings.kind.clone(),
        settings.capabilities.clone(),
    )
    .with_cost_table(settings.cost_per_1k.clone());
    Ok(ProviderEntry::new(provider, descriptor))
}

// =============================================================================
// Prompt / Response Helpers
// =============================================================================

/// Render a task request into a backend prompt.
///
/// The gateway does not own task semantics; it only frames the context so
/// backends can respond with structured JSON.
pub(crate) fn build_task_prompt(request: &TaskRequest) -> String {
    let context = Value::Object(request.context.clone()).to_string();
    let limit_note = request
        .limit
        .map(|n| format!(" Return at most {n} results."))
        .unwrap_or_default();

    match request.task_type {
        TaskType::SimilaritySearch => format!(
            "Find items most similar to the query in this context.{limit_note}\n\
             Respond with a JSON object {{\"matches\": [...]}}.\n\nContext: {context}"
        ),
        TaskType::Analysis => format!(
            "Analyze the following payload and respond with a JSON object \
             {{\"analysis\": {{...}}}}.{limit_note}\n\nContext: {context}"
        ),
        TaskType::Suggestion => format!(
            "Generate suggestions for the subject below.{limit_note}\n\
             Respond with a JSON object {{\"suggestions\": [...]}}.\n\nContext: {context}"
        ),
        TaskType::Completion => format!(
            "Complete the request below. Respond with a JSON object \
             {{\"completion\": \"...\"}}.{limit_note}\n\nContext: {context}"
        ),
    }
}

/// Extract a JSON value from a backend response body.
///
/// Tolerates markdown code fences and falls back to wrapping raw text.
pub(crate) fn extract_json(raw: &str) -> Value {
    let trimmed = raw.trim();
    let candidate = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(candidate).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
