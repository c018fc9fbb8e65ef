// src/circuit_breaker/target.rs
use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::sync::Arc;

use super::breaker::{CircuitBreaker, CircuitBreakerState};
use crate::config::CircuitBreakerConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{ProxyError, Upstream};

/// Wraps another upstream and takes it out of rotation while its breaker is
/// open. Transport errors, timeouts and 5xx responses count as failures.
pub struct BreakerTarget {
    inner: Arc<dyn Upstream>,
    breaker: CircuitBreaker,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BreakerTarget {
    pub fn new(inner: Arc<dyn Upstream>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.breaker.get_state()
    }

    fn publish_state(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_circuit_breaker_state(self.inner.address(), self.breaker.get_state());
        }
    }
}

#[async_trait]
impl Upstream for BreakerTarget {
    fn address(&self) -> &str {
        self.inner.address()
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive() && self.breaker.call_permitted()
    }

    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let result = self.inner.forward(req).await;

        match &result {
            Ok(response) if !response.status().is_server_error() => self.breaker.record_success(),
            _ => self.breaker.record_failure(),
        }
        self.publish_state();

        result
    }
}
