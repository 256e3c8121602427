//! Per-provider resilience: circuit breaking and retry.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{ExponentialBackoff, FixedDelay, RateLimitAware, RetryConfig, RetryPolicy};
