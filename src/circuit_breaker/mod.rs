// src/circuit_breaker/mod.rs
mod breaker;
mod target;

pub use breaker::{CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerState};
pub use target::BreakerTarget;
