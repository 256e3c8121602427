//! Circuit breaker protecting a single provider.
//!
//! Repeated failures open the circuit and subsequent calls are refused
//! without touching the network. After `open_duration` one probe is let
//! through; enough probe successes close the circuit again.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::config::duration_secs;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a recovery probe (in seconds).
    #[serde(with = "duration_secs")]
    pub open_duration: Duration,

    /// Probe successes needed to close the circuit.
    pub half_open_success_threshold: u32,

    /// When false, the breaker admits every call and records nothing.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            half_open_success_threshold: 2,
            enabled: true,
        }
    }
}

/// Observable state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are refused
    Open,

    /// Probe calls are admitted
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32 },
}

/// Per-provider circuit breaker.
///
/// Reading [`CircuitBreaker::state`] performs the Open to HalfOpen
/// transition once `open_duration` has elapsed, exactly like
/// [`CircuitBreaker::allow`], so the two always agree on the first call
/// after the timeout.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::Closed { failures: 0 }),
            config,
        }
    }

    /// Whether a call may proceed. Open circuits refuse until
    /// `open_duration` has elapsed, then admit a probe.
    pub fn allow(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut inner = self.inner.lock();
        self.tick(&mut inner);
        !matches!(*inner, Inner::Open { .. })
    }

    /// Current state. Stateful: performs the Open to HalfOpen transition.
    pub fn state(&self) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }
        let mut inner = self.inner.lock();
        self.tick(&mut inner);
        match *inner {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn tick(&self, inner: &mut Inner) {
        if let Inner::Open { opened_at } = *inner {
            if opened_at.elapsed() >= self.config.open_duration {
                *inner = Inner::HalfOpen { successes: 0 };
                tracing::info!("circuit half-open, admitting recovery probe");
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { .. } => {
                *inner = Inner::Closed { failures: 0 };
            }
            Inner::HalfOpen { successes } => {
                if successes + 1 >= self.config.half_open_success_threshold {
                    *inner = Inner::Closed { failures: 0 };
                    tracing::info!("circuit closed after successful recovery");
                } else {
                    *inner = Inner::HalfOpen {
                        successes: successes + 1,
                    };
                }
            }
            // A success while fully open has no probe to credit.
            Inner::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { failures } => {
                if failures + 1 >= self.config.failure_threshold {
                    *inner = Inner::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(failures = failures + 1, "circuit opened after repeated failures");
                } else {
                    *inner = Inner::Closed {
                        failures: failures + 1,
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                *inner = Inner::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!("circuit reopened after failed recovery probe");
            }
            Inner::Open { .. } => {}
        }
    }

    /// Consecutive failures observed while closed.
    pub fn consecutive_failures(&self) -> u32 {
        match *self.inner.lock() {
            Inner::Closed { failures } => failures,
            _ => 0,
        }
    }

    /// Force the circuit back to closed.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::Closed { failures: 0 };
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure_threshold: u32, open_duration: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            open_duration,
            half_open_success_threshold: 2,
            enabled: true,
        })
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = breaker(2, Duration::from_secs(300));

        cb.record_failure();
        assert!(cb.allow());

        cb.record_failure();
        assert!(!cb.allow());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(300));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();

        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow());
    }

    #[test]
    fn test_half_open_after_open_duration() {
        let cb = breaker(1, Duration::ZERO);

        cb.record_failure();
        // open_duration already elapsed, so the next read probes
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow());
    }

    #[test]
    fn test_half_open_closes_after_enough_successes() {
        let cb = breaker(1, Duration::ZERO);

        cb.record_failure();
        assert!(cb.allow()); // transitions to half-open

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(50));

        cb.record_failure();
        assert!(!cb.allow());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.allow()); // probe admitted

        cb.record_failure();
        assert!(!cb.allow()); // reopened, window not yet elapsed
    }

    #[test]
    fn test_reset_closes_circuit() {
        let cb = breaker(1, Duration::from_secs(300));
        cb.record_failure();
        assert!(!cb.allow());

        cb.reset();
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_disabled_breaker_admits_everything() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_secs(300),
            half_open_success_threshold: 1,
            enabled: false,
        });

        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
