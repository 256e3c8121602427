//! Ollama local-model adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    classify_response, classify_transport, extract_error_message, LlmProvider, ProviderError,
    ProviderFactory, RawCompletion,
};
use crate::config::ModelConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Adapter for a local Ollama daemon's `/api/generate` endpoint.
///
/// No credentials: a non-empty model name is all the configuration needed.
pub struct OllamaProvider {
    config: ModelConfig,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, config: ModelConfig) -> Self {
        Self::with_breaker(client, config, CircuitBreaker::default())
    }

    pub fn with_breaker(
        client: reqwest::Client,
        config: ModelConfig,
        breaker: CircuitBreaker,
    ) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            config,
            client,
            breaker,
            base_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        !self.config.model.trim().is_empty()
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn breaker(&self) -> Option<&CircuitBreaker> {
        Some(&self.breaker)
    }

    async fn send_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<RawCompletion, ProviderError> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            system: system_prompt.map(str::to_string),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let message = extract_error_message(response).await;
            return Err(classify_response(status, &headers, message));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(RawCompletion {
            content: body.response,
            model: self.config.model.clone(),
            prompt_tokens: body.prompt_eval_count,
            completion_tokens: body.eval_count,
        })
    }
}

/// Catalog entry for [`OllamaProvider`].
pub struct OllamaProviderFactory;

impl ProviderFactory for OllamaProviderFactory {
    fn kind(&self) -> &'static str {
        "ollama"
    }

    fn build(
        &self,
        client: reqwest::Client,
        config: ModelConfig,
        breaker: CircuitBreakerConfig,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        config
            .validate()
            .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
        Ok(Arc::new(OllamaProvider::with_breaker(
            client,
            config,
            CircuitBreaker::new(breaker),
        )))
    }

    fn description(&self) -> &'static str {
        "Local Ollama daemon"
    }
}
