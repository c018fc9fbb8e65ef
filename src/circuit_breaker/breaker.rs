// src/circuit_breaker/breaker.rs

use crate::config::CircuitBreakerConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,     // Normal operation
    Open,       // Failing, rejecting requests
    HalfOpen,   // Testing if service recovered
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Passive failure detector. All transitions happen under one short lock so
/// the breaker can be consulted from the non-blocking selection path.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn call_permitted(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.timeout());
                if cooled_down {
                    Self::transition(&mut inner, CircuitBreakerState::HalfOpen);
                    tracing::info!("Circuit breaker transitioned to half-open");
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count = 0;
            }
            CircuitBreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitBreakerState::Closed);
                    tracing::info!("Circuit breaker closed after successful recovery");
                }
            }
            CircuitBreakerState::Open => {
                // A request admitted before the breaker opened came back fine.
                Self::transition(&mut inner, CircuitBreakerState::Closed);
                tracing::info!("Circuit breaker closed after successful recovery");
            }
        }
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    Self::transition(&mut inner, CircuitBreakerState::Open);
                    tracing::warn!("Circuit breaker opened after {} failures", failures);
                }
            }
            CircuitBreakerState::HalfOpen => {
                Self::transition(&mut inner, CircuitBreakerState::Open);
                tracing::warn!("Circuit breaker re-opened, trial request failed");
            }
            CircuitBreakerState::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    fn transition(inner: &mut BreakerInner, state: CircuitBreakerState) {
        inner.state = state;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = match state {
            CircuitBreakerState::Open => Some(Instant::now()),
            _ => None,
        };
    }

    pub fn get_state(&self) -> CircuitBreakerState {
        self.lock().state
    }

    pub fn get_metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreakerMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub failure_count: u32,
    pub success_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_secs,
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker(60);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.get_state(), CircuitBreakerState::Closed);
        assert!(cb.call_permitted());

        cb.record_failure();
        assert_eq!(cb.get_state(), CircuitBreakerState::Open);
        assert!(!cb.call_permitted());

        let metrics = cb.get_metrics();
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 3);
    }

    #[test]
    fn success_resets_failure_streak() {
        let cb = breaker(60);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.get_state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn half_open_recovers_after_successes() {
        let cb = breaker(0);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.call_permitted());
        assert_eq!(cb.get_state(), CircuitBreakerState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.get_state(), CircuitBreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.get_state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker(0);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.call_permitted());
        cb.record_failure();
        assert_eq!(cb.get_state(), CircuitBreakerState::Open);
    }
}
