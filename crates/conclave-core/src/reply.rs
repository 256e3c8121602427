//! Core data model shared across the orchestration pipeline.
//!
//! A [`Reply`] is the uniform record every provider adapter emits: remote
//! faults are encoded inside it, never thrown. Downstream stages only ever
//! read replies; nothing mutates one after the adapter stamps it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Canonical failure reason for client-side cancellation and deadlines.
pub const CANCELLED_OR_TIMED_OUT: &str = "cancelled or timed out";

/// Canonical failure reason when a circuit breaker refuses the call.
pub const CIRCUIT_OPEN: &str = "circuit open";

/// Serde helper: `Duration` as integer milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Rate-limit metadata parsed from HTTP headers on a 429 response.
///
/// Every field is optional: malformed or absent header values are dropped
/// rather than failing the reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Server-requested wait before the next attempt (`Retry-After`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,

    /// Requests left in the current window (`X-RateLimit-Remaining`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_requests: Option<u32>,

    /// When the window resets (`X-RateLimit-Reset`, Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,

    /// Window size (`X-RateLimit-Limit`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl RateLimitInfo {
    /// True when no header yielded a usable value.
    pub fn is_empty(&self) -> bool {
        self.retry_after.is_none()
            && self.remaining_requests.is_none()
            && self.reset_at.is_none()
            && self.limit.is_none()
    }
}

/// One provider's answer to one prompt.
///
/// Invariants: `success == false` implies `error` is set and non-empty;
/// `success == true` implies `content` is present (possibly empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    /// Registry name of the provider that produced this reply.
    pub provider: String,

    /// Model identifier the provider used.
    pub model: String,

    /// Generated text. Empty string is a legal successful answer.
    pub content: String,

    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,

    /// Tokens in the completion.
    pub completion_tokens: u32,

    /// Wall-clock time the call took.
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// Whether the call produced a usable answer.
    pub success: bool,

    /// Failure reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// True when the provider answered 429.
    #[serde(default)]
    pub rate_limited: bool,

    /// HTTP status of a failed call, when one was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    /// Rate-limit headers captured alongside a 429.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl Reply {
    /// Build a successful reply.
    pub fn success(
        provider: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        prompt_tokens: u32,
        completion_tokens: u32,
        duration: Duration,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            content: content.into(),
            prompt_tokens,
            completion_tokens,
            duration,
            success: true,
            error: None,
            rate_limited: false,
            http_status: None,
            rate_limit: None,
        }
    }

    /// Build a failed reply. The error message must be non-empty.
    pub fn failure(
        provider: impl Into<String>,
        model: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        debug_assert!(!error.is_empty(), "failed replies carry a reason");
        Self {
            provider: provider.into(),
            model: model.into(),
            content: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            duration: Duration::ZERO,
            success: false,
            error: Some(error),
            rate_limited: false,
            http_status: None,
            rate_limit: None,
        }
    }

    /// Attach the observed wall-clock duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Attach the HTTP status of a failed call.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Mark the reply rate-limited and attach parsed header info.
    pub fn with_rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.rate_limited = true;
        self.rate_limit = Some(info);
        self
    }

    /// Prompt tokens plus completion tokens.
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Verdict of one validator over one reply's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Name of the validator that produced this outcome.
    pub validator: String,

    /// Whether the content passed.
    pub valid: bool,

    /// Reason for rejection when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationOutcome {
    pub fn pass(validator: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            valid: true,
            error: None,
        }
    }

    pub fn fail(validator: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// A successful reply annotated with its composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredReply {
    /// Provider that produced the underlying reply.
    pub provider: String,

    /// The reply text being ranked.
    pub content: String,

    /// Composite score in `[0, 1]`.
    pub score: f64,

    /// Per-scorer contributions, keyed by scorer name.
    pub breakdown: BTreeMap<String, f64>,

    /// How long the provider took.
    #[serde(with = "duration_millis")]
    pub response_time: Duration,

    /// Prompt plus completion tokens for the call.
    pub total_tokens: u32,
}

impl ScoredReply {
    /// Annotate a successful reply with its score and breakdown.
    pub fn from_reply(reply: &Reply, score: f64, breakdown: BTreeMap<String, f64>) -> Self {
        Self {
            provider: reply.provider.clone(),
            content: reply.content.clone(),
            score,
            breakdown,
            response_time: reply.duration,
            total_tokens: reply.total_tokens(),
        }
    }
}

/// The decision a consensus strategy reaches over a set of scored replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    /// Whether the strategy's agreement rule was satisfied.
    pub consensus_reached: bool,

    /// Winning reply text, when a winner exists.
    pub best_content: Option<String>,

    /// Provider of the winning reply.
    pub best_provider: Option<String>,

    /// Score of the winning reply.
    pub best_score: f64,

    /// Strategy-specific confidence in `[0, 1]`.
    pub confidence: f64,

    /// Number of replies agreeing with the winner (winner included).
    pub agreement_count: usize,

    /// Number of replies considered.
    pub total_models: usize,

    /// Providers outside the agreeing set, in input order.
    pub dissenting_providers: Vec<String>,

    /// Every scored reply, in input order.
    pub all_scored: Vec<ScoredReply>,
}

impl ConsensusOutcome {
    /// Outcome for an empty input: no consensus, zero confidence.
    pub fn empty() -> Self {
        Self {
            consensus_reached: false,
            best_content: None,
            best_provider: None,
            best_score: 0.0,
            confidence: 0.0,
            agreement_count: 0,
            total_models: 0,
            dissenting_providers: Vec::new(),
            all_scored: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_tokens_is_sum() {
        let reply = Reply::success("a", "m", "hi", 40, 60, Duration::from_millis(100));
        assert_eq!(reply.total_tokens(), 100);
    }

    #[test]
    fn test_failure_carries_reason() {
        let reply = Reply::failure("a", "m", "boom");
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("boom"));
        assert_eq!(reply.duration, Duration::ZERO);
    }

    #[test]
    fn test_rate_limit_attachment() {
        let info = RateLimitInfo {
            retry_after: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let reply = Reply::failure("a", "m", "HTTP 429").with_status(429).with_rate_limit(info);
        assert!(reply.rate_limited);
        assert_eq!(reply.http_status, Some(429));
        assert_eq!(
            reply.rate_limit.unwrap().retry_after,
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_reply_serde_round_trip() {
        let reply = Reply::success("a", "m", "text", 1, 2, Duration::from_millis(250));
        let json = serde_json::to_string(&reply).unwrap();
        let back: Reply = serde_json::from_str(&json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(250));
        assert_eq!(back.content, "text");
    }

    #[test]
    fn test_empty_outcome() {
        let outcome = ConsensusOutcome::empty();
        assert!(!outcome.consensus_reached);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.total_models, 0);
    }
}
