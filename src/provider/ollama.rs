//! Ollama Backend
//!
//! Provider for locally-running Ollama models. Local inference is free, so
//! cost estimates are always zero; token counts come from the eval counters
//! Ollama reports.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    HttpPool, Provider, ProviderResponse, ProviderSettings, build_task_prompt, extract_json,
};
use crate::types::{ErrorClassifier, GatewayError, Result, TaskRequest, TaskType, TokenUsage};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";

/// Ollama local model backend
pub struct OllamaProvider {
    api_base: String,
    model: String,
    id: String,
    capabilities: Vec<TaskType>,
    timeout: Duration,
    http: HttpPool,
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("id", &self.id)
            .finish()
    }
}

impl OllamaProvider {
    pub fn new(settings: ProviderSettings, http: HttpPool) -> Result<Self> {
        let api_base = settings
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        // Validate endpoint URL for security (SSRF prevention)
        let api_base = Self::validate_endpoint(&api_base)?;

        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_base,
            model,
            id: settings.provider_id(),
            capabilities: settings.capabilities,
            timeout: Duration::from_secs(settings.timeout_secs),
            http,
        })
    }

    /// Validate endpoint URL for security (SSRF prevention)
    ///
    /// Only allows http/https schemes and warns for non-localhost endpoints.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            GatewayError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "::1")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        // Remove trailing slash for consistency
        let mut result = url.to_string();
        if result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    fn build_request(&self, prompt: &str) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: Some("json".to_string()),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn execute(&self, request: &TaskRequest) -> Result<ProviderResponse> {
        info!(
            provider = %self.id,
            model = %self.model,
            task = %request.task_type,
            "Dispatching to Ollama"
        );

        let start_time = Instant::now();
        let prompt = build_task_prompt(request);
        let body = self.build_request(&prompt);
        let url = format!("{}/api/generate", self.api_base);

        let conn = self.http.acquire().await?;
        let response = conn
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_connect() {
                    format!(
                        "Failed to connect to Ollama at {}. Is Ollama running? Start with: ollama serve",
                        self.api_base
                    )
                } else {
                    format!("Ollama request failed: {}", e)
                };
                GatewayError::Provider(ErrorClassifier::classify(&message, &self.id))
            })?;

        let elapsed = start_time.elapsed();

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Provider(
                ErrorClassifier::classify_http_status(status, &body, &self.id),
            ));
        }

        let response_body: OllamaResponse = response.json().await.map_err(|e| {
            GatewayError::Provider(ErrorClassifier::classify(
                &format!("Failed to parse Ollama response: {}", e),
                &self.id,
            ))
        })?;

        let usage = TokenUsage::new(
            response_body.prompt_eval_count.unwrap_or(0),
            response_body.eval_count.unwrap_or(0),
        );

        debug!(provider = %self.id, latency_ms = elapsed.as_millis() as u64, "Ollama responded");
        let content = extract_json(&response_body.response);

        Ok(ProviderResponse {
            content,
            usage,
            cost_usd: 0.0,
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

    fn estimate_cost(&self, _request: &TaskRequest) -> Result<f64> {
        // Local inference, always free
        Ok(0.0)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.api_base);

        let conn = self.http.acquire().await?;
        let response = conn.get(&url).timeout(self.timeout).send().await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(tags) = resp.json::<OllamaTagsResponse>().await {
                    let model_available = tags.models.iter().any(|m| {
                        m.name == self.model
                            || m.name.starts_with(&self.model.replace(":latest", ""))
                    });

                    if model_available {
                        debug!(provider = %self.id, model = %self.model, "Ollama is available");
                        Ok(true)
                    } else {
                        warn!(
                            "Ollama is running but model '{}' not found. Pull with: ollama pull {}",
                            self.model, self.model
                        );
                        Ok(false)
                    }
                } else {
                    Ok(true)
                }
            }
            Ok(resp) => {
                warn!(provider = %self.id, status = %resp.status(), "Ollama API check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(provider = %self.id, error = %e, "Ollama not available. Start with: ollama serve");
                Ok(false)
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::default_http_pool;

    #[test]
    fn test_default_settings() {
        let settings = ProviderSettings {
            kind: "ollama".to_string(),
            ..Default::default()
        };

        let provider = OllamaProvider::new(settings, default_http_pool()).expect("Failed to create provider");
        assert_eq!(provider.api_base, DEFAULT_API_BASE);
        assert_eq!(provider.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let settings = ProviderSettings {
            kind: "ollama".to_string(),
            api_base: Some("ftp://localhost:11434".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            OllamaProvider::new(settings, default_http_pool()),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_strips_trailing_slash() {
        let settings = ProviderSettings {
            kind: "ollama".to_string(),
            api_base: Some("http://localhost:11434/".to_string()),
            ..Default::default()
        };
        let provider = OllamaProvider::new(settings, default_http_pool()).unwrap();
        assert_eq!(provider.api_base, "http://localhost:11434");
    }

    #[test]
    fn test_local_cost_is_zero() {
        let settings = ProviderSettings {
            kind: "ollama".to_string(),
            ..Default::default()
        };
        let provider = OllamaProvider::new(settings, default_http_pool()).unwrap();
        let request = TaskRequest::new(TaskType::Completion);
        assert_eq!(provider.estimate_cost(&request).unwrap(), 0.0);
    }
}
