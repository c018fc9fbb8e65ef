// src/load_balancer/dispatcher.rs
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::RoundRobin;
use crate::circuit_breaker::BreakerTarget;
use crate::config::{CircuitBreakerConfig, ConfigError};
use crate::metrics::MetricsCollector;
use crate::proxy::{BackendPool, ProxyError, Upstream};

/// Fixed, ordered pool of upstream targets plus the rotation cursor.
pub struct Dispatcher {
    targets: Vec<Arc<dyn Upstream>>,
    balancer: RoundRobin,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    pub fn new(targets: Vec<Arc<dyn Upstream>>) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::EmptyPool);
        }

        Ok(Self {
            targets,
            balancer: RoundRobin::new(),
            metrics: None,
        })
    }

    /// One reverse-proxying target per address, in input order.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self, ConfigError> {
        let pool = BackendPool::from_addresses(addresses)?;
        Self::from_pool(&pool, None, None)
    }

    /// Builds the dispatcher over an existing pool, wrapping every backend in
    /// a circuit breaker when one is configured.
    pub fn from_pool(
        pool: &BackendPool,
        breaker: Option<&CircuitBreakerConfig>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, ConfigError> {
        let targets = pool
            .all_backends()
            .iter()
            .map(|backend| -> Arc<dyn Upstream> {
                let target: Arc<dyn Upstream> = backend.clone();
                match (breaker, &metrics) {
                    (Some(config), Some(m)) => Arc::new(
                        BreakerTarget::new(target, config.clone()).with_metrics(m.clone()),
                    ),
                    (Some(config), None) => Arc::new(BreakerTarget::new(target, config.clone())),
                    (None, _) => target,
                }
            })
            .collect();

        let mut dispatcher = Self::new(targets)?;
        dispatcher.metrics = metrics;
        Ok(dispatcher)
    }

    pub fn targets(&self) -> &[Arc<dyn Upstream>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Picks the next live target, checking each slot at most once.
    pub fn select(&self) -> Result<Arc<dyn Upstream>, ProxyError> {
        self.balancer
            .next(&self.targets, |target| target.is_alive())
            .map(|index| self.targets[index].clone())
            .ok_or(ProxyError::NoAvailableUpstream)
    }

    /// Entry point for one inbound request.
    pub async fn dispatch(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let span = tracing::info_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.uri().path(),
        );

        async move {
            let target = match self.select() {
                Ok(target) => target,
                Err(err) => {
                    warn!(pool_size = self.targets.len(), "No available upstream");
                    self.record_failure(&err);
                    return Err(err);
                }
            };

            info!("Forwarding request to address {:?}", target.address());

            let method = req.method().clone();
            let start = Instant::now();
            let result = target.forward(req).await;

            match &result {
                Ok(response) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_request(
                            method.as_str(),
                            response.status().as_u16(),
                            target.address(),
                            start.elapsed(),
                        );
                    }
                }
                Err(err) => {
                    warn!(address = target.address(), %err, "Upstream exchange failed");
                    self.record_failure(err);
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    fn record_failure(&self, err: &ProxyError) {
        if let Some(metrics) = &self.metrics {
            let reason = match err {
                ProxyError::NoAvailableUpstream => "no_available_upstream",
                ProxyError::Upstream(_) => "upstream_error",
                ProxyError::Timeout => "timeout",
            };
            metrics.record_dispatch_failure(reason);
        }
    }
}
