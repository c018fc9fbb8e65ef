// src/metrics/collector.rs
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

use crate::circuit_breaker::CircuitBreakerState;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub dispatch_failures_total: IntCounterVec,

    // Backend metrics
    pub backend_health_status: IntGaugeVec,
    pub circuit_breaker_state: IntGaugeVec,

    // Pool metrics
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of forwarded requests"),
            &["method", "status_code", "backend"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Time until the upstream response head arrived",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let dispatch_failures_total = IntCounterVec::new(
            Opts::new(
                "lb_dispatch_failures_total",
                "Requests answered with a gateway error",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(dispatch_failures_total.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=alive, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "lb_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of alive backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        let total_backends = IntGauge::new("lb_total_backends", "Total number of backends")?;
        registry.register(Box::new(total_backends.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            dispatch_failures_total,
            backend_health_status,
            circuit_breaker_state,
            healthy_backends,
            total_backends,
        })
    }

    pub fn record_request(&self, method: &str, status_code: u16, backend: &str, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, &status, backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_dispatch_failure(&self, reason: &str) {
        self.dispatch_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        let value = if healthy { 1 } else { 0 };
        self.backend_health_status
            .with_label_values(&[backend])
            .set(value);
    }

    pub fn update_circuit_breaker_state(&self, backend: &str, state: CircuitBreakerState) {
        let value = match state {
            CircuitBreakerState::Closed => 0,
            CircuitBreakerState::Open => 1,
            CircuitBreakerState::HalfOpen => 2,
        };

        self.circuit_breaker_state
            .with_label_values(&[backend])
            .set(value);
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_recorded_values() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_request("GET", 200, "http://a.local", Duration::from_millis(12));
        metrics.record_dispatch_failure("no_available_upstream");
        metrics.update_backend_counts(2, 3);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains(
            r#"lb_requests_total{backend="http://a.local",method="GET",status_code="200"} 1"#
        ));
        assert!(text.contains(r#"lb_dispatch_failures_total{reason="no_available_upstream"} 1"#));
        assert!(text.contains("lb_healthy_backends 2"));
        assert!(text.contains("lb_total_backends 3"));
    }
}
