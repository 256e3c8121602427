//! Google Gemini generateContent adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{
    classify_response, classify_transport, extract_error_message, LlmProvider, ProviderError,
    ProviderFactory, RawCompletion,
};
use crate::config::ModelConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Gemini `models/{model}:generateContent` endpoint.
///
/// Gemini has no separate system slot in this wire shape; a system prompt
/// is prepended to the user text with a blank line.
pub struct GeminiProvider {
    config: ModelConfig,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    base_url: String,
}

impl GeminiProvider {
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
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
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
            .ok_or_else(|| ProviderError::NotConfigured("gemini API key missing".to_string()))?;

        let text = match system_prompt {
            Some(system) => format!("{system}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.config.model
        );
        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
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

        let content = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("response carried no candidates".to_string()))?
            .content
            .parts
            .into_iter()
            .map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(RawCompletion {
            content,
            model: self.config.model.clone(),
            prompt_tokens: body.usage_metadata.prompt_token_count,
            completion_tokens: body.usage_metadata.candidates_token_count,
        })
    }
}

/// Catalog entry for [`GeminiProvider`].
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn kind(&self) -> &'static str {
        "gemini"
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
        Ok(Arc::new(GeminiProvider::with_breaker(
            client,
            config,
            CircuitBreaker::new(breaker),
        )))
    }

    fn description(&self) -> &'static str {
        "Google Gemini generateContent API"
    }
}
