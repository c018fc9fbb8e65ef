// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::health::HealthStatus;
use crate::metrics::MetricsCollector;
use crate::proxy::{join_paths, Backend, BackendPool, Upstream};
use anyhow::Result;
use reqwest::Client;
use std::sync::Arc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Active checker: periodically GETs `<backend>/<path>` and feeds the result
/// into each backend's `HealthState`. The check path is appended to the
/// backend's own base path, the same way proxied requests are.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: Arc<BackendPool>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            pool,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn start(self: Arc<Self>) {
        let mut interval = interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting health checker with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn check_all_backends(&self) -> Vec<HealthCheckResult> {
        let checks = self
            .pool
            .all_backends()
            .iter()
            .map(|backend| self.check_backend(backend.clone()));
        let results = futures::future::join_all(checks).await;

        let mut healthy_count = 0;
        let mut unhealthy_count = 0;

        for result in &results {
            if result.healthy {
                healthy_count += 1;
                debug!("Backend {} is healthy", result.backend_id);
            } else {
                unhealthy_count += 1;
                warn!(
                    "Backend {} failed health check: {:?}",
                    result.backend_id, result.error
                );
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(self.pool.healthy_count(), self.pool.len());
        }

        debug!(
            "Health check complete: {} passed, {} failed",
            healthy_count, unhealthy_count
        );
        results
    }

    async fn check_backend(&self, backend: Arc<Backend>) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let mut url = backend.url.clone();
        url.set_path(&join_paths(backend.url.path(), &self.config.path));

        // reqwest carries its own timeout; the outer one also covers DNS and connect.
        let (healthy, error) = match timeout(self.config.timeout(), self.client.get(url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => (true, None),
            Ok(Ok(response)) => (false, Some(format!("HTTP {}", response.status()))),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("Request timeout".to_string())),
        };

        let response_time_ms = start.elapsed().as_millis() as u64;

        let transition = backend.health().record(
            healthy,
            self.config.healthy_threshold as usize,
            self.config.unhealthy_threshold as usize,
        );

        match transition {
            Some(HealthStatus::Healthy) => info!(
                "Backend {} is now healthy after {} consecutive successes",
                backend.id,
                backend.health().consecutive_successes()
            ),
            Some(HealthStatus::Unhealthy) => warn!(
                "Backend {} is now unhealthy after {} consecutive failures",
                backend.id,
                backend.health().consecutive_failures()
            ),
            _ => {}
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(backend.address(), backend.health().is_alive());
        }

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error,
        }
    }
}
