//! Anthropic messages-API adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    classify_response, classify_transport, extract_error_message, LlmProvider, ProviderError,
    ProviderFactory, RawCompletion,
};
use crate::config::ModelConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic `/v1/messages` endpoint.
pub struct AnthropicProvider {
    config: ModelConfig,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    base_url: String,
}

impl AnthropicProvider {
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
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn is_configured(&self) -> bool {
        self.config.api_key().is_some() && !self.config.model.trim().is_empty()
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
        let api_key = self.config.api_key().ok_or_else(|| {
            ProviderError::NotConfigured("anthropic API key missing".to_string())
        })?;

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system: system_prompt.map(str::to_string),
            temperature: Some(self.config.temperature),
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
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

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(RawCompletion {
            content,
            model: body.model,
            prompt_tokens: body.usage.input_tokens,
            completion_tokens: body.usage.output_tokens,
        })
    }
}

/// Catalog entry for [`AnthropicProvider`].
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn kind(&self) -> &'static str {
        "anthropic"
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
        Ok(Arc::new(AnthropicProvider::with_breaker(
            client,
            config,
            CircuitBreaker::new(breaker),
        )))
    }

    fn description(&self) -> &'static str {
        "Anthropic messages API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(config: ModelConfig) -> AnthropicProvider {
        AnthropicProvider::new(reqwest::Client::new(), config)
    }

    #[test]
    fn test_display_name() {
        let p = provider(ModelConfig::new("anthropic", "claude-sonnet-4-5").with_api_key("key"));
        assert_eq!(p.display_name(), "anthropic/claude-sonnet-4-5");
    }

    #[test]
    fn test_configured_requires_api_key() {
        let without_key = provider(ModelConfig::new("anthropic", "claude-sonnet-4-5"));
        assert!(!without_key.is_configured());

        let with_key =
            provider(ModelConfig::new("anthropic", "claude-sonnet-4-5").with_api_key("key"));
        assert!(with_key.is_configured());
    }

    #[test]
    fn test_base_url_override() {
        let p = provider(
            ModelConfig::new("anthropic", "claude-sonnet-4-5")
                .with_api_key("key")
                .with_base_url("http://localhost:9999/v1"),
        );
        assert_eq!(p.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn test_request_serialization_omits_empty_system() {
        let request = MessagesRequest {
            model: "m".to_string(),
            max_tokens: 100,
            messages: vec![Message {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            system: None,
            temperature: Some(0.7),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
