//! OpenAI Backend
//!
//! Provider for OpenAI's Chat Completions API. Responses carry the token
//! usage the API reports; cost is estimated from the configured per-model
//! rate table since the API does not quote cost inline.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    HttpPool, Provider, ProviderResponse, ProviderSettings, build_task_prompt, cost_from_rate,
    extract_json,
};
use crate::types::{
    ErrorClassifier, GatewayError, Result, TaskRequest, TaskType, TokenUsage,
};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI backend with secure API key handling
pub struct OpenAiProvider {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    id: String,
    max_tokens: usize,
    capabilities: Vec<TaskType>,
    cost_per_1k: Option<f64>,
    timeout: Duration,
    http: HttpPool,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("id", &self.id)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings, http: HttpPool) -> Result<Self> {
        let api_key_str = settings
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                GatewayError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY env var or provide in config"
                        .to_string(),
                )
            })?;

        let api_base = settings
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let cost_per_1k = settings.cost_per_1k.get(&model).copied();

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            model,
            id: settings.provider_id(),
            max_tokens: settings.max_tokens,
            capabilities: settings.capabilities,
            cost_per_1k,
            timeout: Duration::from_secs(settings.timeout_secs),
            http,
        })
    }

    fn build_request(&self, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a task execution engine. Always respond with valid JSON, \
                              no explanation."
                        .to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: Some(self.max_tokens),
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn execute(&self, request: &TaskRequest) -> Result<ProviderResponse> {
        info!(
            provider = %self.id,
            model = %self.model,
            task = %request.task_type,
            "Dispatching to OpenAI"
        );

        let start_time = Instant::now();
        let prompt = build_task_prompt(request);
        let body = self.build_request(&prompt);
        let url = format!("{}/chat/completions", self.api_base);

        let conn = self.http.acquire().await?;
        let response = conn
            .post(&url)
            .timeout(self.timeout)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                GatewayError::Provider(ErrorClassifier::classify(&e.to_string(), &self.id))
            })?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(
                ErrorClassifier::classify_http_status(status, &body, &self.id),
            ));
        }

        let response_body: ChatCompletionResponse = response.json().await.map_err(|e| {
            GatewayError::Provider(ErrorClassifier::classify(
                &format!("Failed to parse OpenAI response: {}", e),
                &self.id,
            ))
        })?;

        let usage = response_body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let content_str = response_body
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| {
                GatewayError::Provider(ErrorClassifier::classify(
                    "No content in OpenAI response",
                    &self.id,
                ))
            })?;

        debug!(provider = %self.id, latency_ms = elapsed.as_millis() as u64, "OpenAI responded");
        let content = extract_json(content_str);

        // The API does not quote cost; derive it from the rate table
        let cost_usd = self
            .cost_per_1k
            .map(|rate| usage.total() as f64 / 1000.0 * rate)
            .unwrap_or(0.0);

        Ok(ProviderResponse {
            content,
            usage,
            cost_usd,
            latency_ms: elapsed.as_millis() as u64,
            model: self.model.clone(),
            provider: self.id.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &[TaskType] {
        &self.capabilities
    }

    fn estimate_cost(&self, request: &TaskRequest) -> Result<f64> {
        match self.cost_per_1k {
            Some(rate) => Ok(cost_from_rate(request, rate)),
            None => Err(GatewayError::Estimation {
                provider: self.id.clone(),
                reason: format!("no rate configured for model '{}'", self.model),
            }),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.api_base);

        let conn = self.http.acquire().await?;
        let response = conn
            .get(&url)
            .timeout(self.timeout)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(provider = %self.id, "OpenAI API is available");
                Ok(true)
            }
            Ok(resp) => {
                warn!(provider = %self.id, status = %resp.status(), "OpenAI API check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(provider = %self.id, error = %e, "OpenAI API check failed");
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::default_http_pool;
    use serde_json::json;

    fn keyed_settings() -> ProviderSettings {
        ProviderSettings {
            kind: "openai".to_string(),
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        // Guard against an ambient key leaking into the test
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        let settings = ProviderSettings {
            kind: "openai".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiProvider::new(settings, default_http_pool()),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_estimate_cost_without_rate_is_estimation_error() {
        let provider = OpenAiProvider::new(keyed_settings(), default_http_pool()).unwrap();
        let request = TaskRequest::new(TaskType::Analysis).with_context("q", json!("x"));
        assert!(matches!(
            provider.estimate_cost(&request),
            Err(GatewayError::Estimation { .. })
        ));
    }

    #[test]
    fn test_estimate_cost_with_rate() {
        let mut settings = keyed_settings();
        settings.model = Some("gpt-4o-mini".to_string());
        settings
            .cost_per_1k
            .insert("gpt-4o-mini".to_string(), 0.15);

        let provider = OpenAiProvider::new(settings, default_http_pool()).unwrap();
        let request =
            TaskRequest::new(TaskType::Analysis).with_context("q", json!("x".repeat(4000)));
        let cost = provider.estimate_cost(&request).unwrap();
        assert!(cost > 0.0);
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = OpenAiProvider::new(keyed_settings(), default_http_pool()).unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-test"));
        assert!(debug.contains("[REDACTED]"));
    }
}
