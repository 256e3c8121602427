//! Retry policies for the outer orchestration loop.
//!
//! A policy is asked for the delay before the *next* attempt given the
//! 1-based number of the attempt that just failed. `None` means stop.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use conclave_core::Reply;

/// Yields the delay before the next attempt, or refuses.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is 1-based; `last_failure` is the most recent failed reply,
    /// when one exists (rate-limit metadata rides on it).
    fn next_delay(&self, attempt: u32, last_failure: Option<&Reply>) -> Option<Duration>;
}

/// The same delay every time, up to `max_attempts`.
pub struct FixedDelay {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, attempt: u32, _last_failure: Option<&Reply>) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.delay)
        } else {
            None
        }
    }
}

/// `min(cap, base · 2^(attempt−1))`, optionally with uniform jitter in
/// `[0, 0.3·delay]`.
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration, jitter: bool, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            jitter,
            max_attempts,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base.as_secs_f64() * 2f64.powi(exponent as i32);
        let mut delay = raw.min(self.cap.as_secs_f64());
        if self.jitter && delay > 0.0 {
            delay += rand::rng().random_range(0.0..=0.3 * delay);
        }
        Duration::from_secs_f64(delay)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, _last_failure: Option<&Reply>) -> Option<Duration> {
        if attempt < self.max_attempts {
            Some(self.backoff(attempt))
        } else {
            None
        }
    }
}

/// Exponential backoff that defers to the server's `Retry-After` when the
/// failed reply carries one. Never exceeds `cap`.
pub struct RateLimitAware {
    backoff: ExponentialBackoff,
}

impl RateLimitAware {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base, cap, true, max_attempts),
        }
    }
}

impl RetryPolicy for RateLimitAware {
    fn next_delay(&self, attempt: u32, last_failure: Option<&Reply>) -> Option<Duration> {
        if attempt >= self.backoff.max_attempts {
            return None;
        }

        let retry_after = last_failure
            .and_then(|reply| reply.rate_limit.as_ref())
            .and_then(|info| info.retry_after);
        if let Some(requested) = retry_after {
            return Some(requested.min(self.backoff.cap));
        }

        Some(self.backoff.backoff(attempt).min(self.backoff.cap))
    }
}

/// Serde-able retry policy description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryConfig {
    FixedDelay {
        delay_seconds: u64,
        max_attempts: u32,
    },
    ExponentialBackoff {
        base_seconds: f64,
        cap_seconds: f64,
        jitter: bool,
        max_attempts: u32,
    },
    RateLimitAware {
        base_seconds: f64,
        cap_seconds: f64,
        max_attempts: u32,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::RateLimitAware {
            base_seconds: 1.0,
            cap_seconds: 30.0,
            max_attempts: 3,
        }
    }
}

impl RetryConfig {
    /// Build the policy this description names.
    pub fn build(&self) -> Arc<dyn RetryPolicy> {
        match *self {
            Self::FixedDelay {
                delay_seconds,
                max_attempts,
            } => Arc::new(FixedDelay::new(Duration::from_secs(delay_seconds), max_attempts)),
            Self::ExponentialBackoff {
                base_seconds,
                cap_seconds,
                jitter,
                max_attempts,
            } => Arc::new(ExponentialBackoff::new(
                Duration::from_secs_f64(base_seconds),
                Duration::from_secs_f64(cap_seconds),
                jitter,
                max_attempts,
            )),
            Self::RateLimitAware {
                base_seconds,
                cap_seconds,
                max_attempts,
            } => Arc::new(RateLimitAware::new(
                Duration::from_secs_f64(base_seconds),
                Duration::from_secs_f64(cap_seconds),
                max_attempts,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::RateLimitInfo;

    #[test]
    fn test_fixed_delay_refuses_past_budget() {
        let policy = FixedDelay::new(Duration::from_secs(2), 3);
        assert_eq!(policy.next_delay(1, None), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2, None), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3, None), None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), false, 10);
        assert_eq!(policy.next_delay(1, None), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2, None), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3, None), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(4, None), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(5, None), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_backoff_jitter_range() {
        let policy =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), true, 10);
        for _ in 0..50 {
            let delay = policy.next_delay(1, None).unwrap();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs_f64(1.3));
        }
    }

    #[test]
    fn test_rate_limit_aware_honours_retry_after() {
        let policy = RateLimitAware::new(Duration::from_secs(1), Duration::from_secs(30), 5);
        let mut reply = Reply::failure("p", "m", "HTTP 429");
        reply = reply.with_rate_limit(RateLimitInfo {
            retry_after: Some(Duration::from_secs(2)),
            ..Default::default()
        });
        assert_eq!(
            policy.next_delay(1, Some(&reply)),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_rate_limit_aware_caps_retry_after() {
        let policy = RateLimitAware::new(Duration::from_secs(1), Duration::from_secs(10), 5);
        let reply = Reply::failure("p", "m", "HTTP 429").with_rate_limit(RateLimitInfo {
            retry_after: Some(Duration::from_secs(120)),
            ..Default::default()
        });
        assert_eq!(
            policy.next_delay(1, Some(&reply)),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_rate_limit_aware_never_exceeds_cap() {
        let cap = Duration::from_secs(8);
        let policy = RateLimitAware::new(Duration::from_secs(3), cap, 100);
        for attempt in 1..50 {
            let delay = policy.next_delay(attempt, None).unwrap();
            assert!(delay <= cap, "attempt {attempt} produced {delay:?}");
        }
    }

    #[test]
    fn test_rate_limit_aware_falls_back_to_backoff() {
        let policy = RateLimitAware::new(Duration::from_secs(1), Duration::from_secs(30), 5);
        let reply = Reply::failure("p", "m", "boom");
        let delay = policy.next_delay(1, Some(&reply)).unwrap();
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_secs_f64(1.3));
    }

    #[test]
    fn test_retry_config_builds() {
        let policy = RetryConfig::default().build();
        assert!(policy.next_delay(1, None).is_some());
        assert_eq!(policy.next_delay(3, None), None);
    }
}
