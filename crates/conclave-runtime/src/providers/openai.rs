//! OpenAI chat-completions adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    classify_response, classify_transport, extract_error_message, LlmProvider, ProviderError,
    ProviderFactory, RawCompletion,
};
use crate::config::ModelConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI `/v1/chat/completions` endpoint.
pub struct OpenAiProvider {
    config: ModelConfig,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    base_url: String,
}

impl OpenAiProvider {
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
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    model: String,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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
        let api_key = self
            .config
            .api_key()
            .ok_or_else(|| ProviderError::NotConfigured("openai API key missing".to_string()))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
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

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response carried no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();

        Ok(RawCompletion {
            content,
            model: body.model,
            prompt_tokens: body.usage.prompt_tokens,
            completion_tokens: body.usage.completion_tokens,
        })
    }
}

/// Catalog entry for [`OpenAiProvider`].
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn kind(&self) -> &'static str {
        "openai"
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
        Ok(Arc::new(OpenAiProvider::with_breaker(
            client,
            config,
            CircuitBreaker::new(breaker),
        )))
    }

    fn description(&self) -> &'static str {
        "OpenAI chat completions API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_requires_api_key() {
        let client = reqwest::Client::new();
        let without = OpenAiProvider::new(client.clone(), ModelConfig::new("openai", "gpt-4o"));
        assert!(!without.is_configured());

        let with = OpenAiProvider::new(
            client,
            ModelConfig::new("openai", "gpt-4o").with_api_key("sk-test"),
        );
        assert!(with.is_configured());
        assert_eq!(with.display_name(), "openai/gpt-4o");
    }

    #[test]
    fn test_system_prompt_becomes_first_message() {
        let mut messages = Vec::new();
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: "be brief".to_string(),
        });
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        });
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages,
            max_tokens: 16,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
    }
}
