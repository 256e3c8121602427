//! LLM provider adapters.
//!
//! A provider adapter wraps one remote text-completion endpoint behind the
//! [`LlmProvider`] trait. The shared `generate` flow lives on the trait
//! itself: adapters only implement `send_request`, the raw wire exchange.
//!
//! Remote faults never surface as `Err`. They are classified and encoded
//! inside a failed [`Reply`]; `Err` is reserved for argument errors caught
//! at the boundary (an empty prompt).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use conclave_core::{RateLimitInfo, Reply, CANCELLED_OR_TIMED_OUT, CIRCUIT_OPEN};

use crate::config::ModelConfig;
use crate::resilience::CircuitBreaker;

mod anthropic;
mod gemini;
mod ollama;
mod openai;
mod registry;

pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};
pub use gemini::{GeminiProvider, GeminiProviderFactory};
pub use ollama::{OllamaProvider, OllamaProviderFactory};
pub use openai::{OpenAiProvider, OpenAiProviderFactory};
pub use registry::{ProviderCatalog, ProviderFactory, ProviderRegistry};

/// HTTP statuses worth retrying.
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Errors from provider adapters.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("rate limited (HTTP 429)")]
    RateLimited { info: RateLimitInfo },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),

    #[error("unknown provider kind '{0}'")]
    UnknownKind(String),
}

impl ProviderError {
    /// HTTP status carried by the error, when one was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Api { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }
}

/// What a successful wire exchange yields before it becomes a [`Reply`].
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Classify a non-success HTTP response.
///
/// 429 carries whatever rate-limit headers parsed; everything else becomes
/// an API error with the upstream message.
pub(crate) fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    message: String,
) -> ProviderError {
    if status.as_u16() == 429 {
        ProviderError::RateLimited {
            info: parse_rate_limit(headers),
        }
    } else {
        ProviderError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Map a transport-level error.
pub(crate) fn classify_transport(error: reqwest::Error, deadline: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(deadline)
    } else {
        ProviderError::Http(error.to_string())
    }
}

/// Pull a human-readable message out of an error body.
///
/// Providers wrap errors differently (`{"error":{"message":..}}`,
/// `{"message":..}`); fall back to the raw body when neither fits.
pub(crate) async fn extract_error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        if let Some(message) = value["error"]["message"].as_str() {
            return message.to_string();
        }
        if let Some(message) = value["message"].as_str() {
            return message.to_string();
        }
    }
    body
}

/// Parse rate-limit headers from a 429 response.
///
/// Malformed values are dropped silently; every field is optional.
pub fn parse_rate_limit(headers: &HeaderMap) -> RateLimitInfo {
    let text = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    RateLimitInfo {
        retry_after: text("retry-after").and_then(parse_retry_after),
        remaining_requests: text("x-ratelimit-remaining").and_then(|v| v.trim().parse().ok()),
        reset_at: text("x-ratelimit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        limit: text("x-ratelimit-limit").and_then(|v| v.trim().parse().ok()),
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    // a date already in the past means "retry now"
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// A uniform wrapper around one remote language-model endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Registry name ("openai", "anthropic", ...).
    fn name(&self) -> &str;

    /// Model identifier requests are issued for.
    fn model_id(&self) -> &str;

    /// `name/model` label for logs and analytics.
    fn display_name(&self) -> String {
        format!("{}/{}", self.name(), self.model_id())
    }

    /// Whether the adapter has everything it needs to issue a request.
    fn is_configured(&self) -> bool;

    fn config(&self) -> &ModelConfig;

    /// The breaker guarding this adapter, when one is attached.
    fn breaker(&self) -> Option<&CircuitBreaker> {
        None
    }

    /// Raw wire exchange. Implementations translate the remote protocol
    /// and classify failures; they do not touch the breaker or the clock.
    async fn send_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<RawCompletion, ProviderError>;

    /// Issue one completion, bounded by the configured deadline and the
    /// caller's cancellation token.
    ///
    /// `Err` is returned only for an empty prompt. Every remote fault comes
    /// back as a failed [`Reply`]. Circuit-breaker accounting: refused
    /// calls and client-side cancellation are not charged as failures.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        ctx: &CancellationToken,
    ) -> Result<Reply, ProviderError> {
        if prompt.trim().is_empty() {
            return Err(ProviderError::EmptyPrompt);
        }

        if let Some(breaker) = self.breaker() {
            if !breaker.allow() {
                tracing::warn!(provider = self.name(), "circuit open, refusing call");
                return Ok(Reply::failure(self.name(), self.model_id(), CIRCUIT_OPEN));
            }
        }

        let started = Instant::now();
        let deadline = self.config().timeout;
        let outcome = tokio::select! {
            _ = ctx.cancelled() => None,
            result = tokio::time::timeout(deadline, self.send_request(prompt, system_prompt)) => {
                result.ok()
            }
        };
        let duration = started.elapsed();

        let reply = match outcome {
            None => {
                tracing::debug!(provider = self.name(), "call cancelled or deadline elapsed");
                Reply::failure(self.name(), self.model_id(), CANCELLED_OR_TIMED_OUT)
                    .with_duration(duration)
            }
            Some(Ok(raw)) => {
                if let Some(breaker) = self.breaker() {
                    breaker.record_success();
                }
                Reply::success(
                    self.name(),
                    raw.model,
                    raw.content,
                    raw.prompt_tokens,
                    raw.completion_tokens,
                    duration,
                )
            }
            // reqwest's own timeout is client-side too; the breaker is not charged
            Some(Err(ProviderError::Timeout(_))) => {
                tracing::debug!(provider = self.name(), "transport timeout");
                Reply::failure(self.name(), self.model_id(), CANCELLED_OR_TIMED_OUT)
                    .with_duration(duration)
            }
            Some(Err(error)) => {
                if let Some(breaker) = self.breaker() {
                    breaker.record_failure();
                }
                tracing::warn!(provider = self.name(), error = %error, "provider call failed");
                let mut reply = Reply::failure(self.name(), self.model_id(), error.to_string())
                    .with_duration(duration);
                if let Some(status) = error.http_status() {
                    reply = reply.with_status(status);
                }
                if let ProviderError::RateLimited { info } = error {
                    reply = reply.with_rate_limit(info);
                }
                reply
            }
        };

        Ok(reply)
    }
}
