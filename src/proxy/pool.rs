// src/proxy/pool.rs
use super::backend::Backend;
use super::proxy::build_client;
use crate::config::{BackendConfig, ConfigError, ForwardConfig, HealthCheckConfig};
use std::sync::Arc;
use std::time::Duration;

/// Ordered set of reverse-proxying backends sharing one outbound client.
#[derive(Clone)]
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
}

impl BackendPool {
    pub fn new(
        configs: &[BackendConfig],
        forward: &ForwardConfig,
        health: &HealthCheckConfig,
    ) -> Result<Self, ConfigError> {
        let addresses: Vec<&str> = configs.iter().map(|c| c.url.as_str()).collect();
        Self::build(&addresses, forward, health.freshness())
    }

    /// Builds a pool with default forwarding settings and no health probing.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self, ConfigError> {
        let addresses: Vec<&str> = addresses.iter().map(AsRef::as_ref).collect();
        Self::build(
            &addresses,
            &ForwardConfig::default(),
            HealthCheckConfig::default().freshness(),
        )
    }

    fn build(
        addresses: &[&str],
        forward: &ForwardConfig,
        freshness: Duration,
    ) -> Result<Self, ConfigError> {
        if addresses.is_empty() {
            return Err(ConfigError::EmptyPool);
        }

        let client = build_client();
        let backends = addresses
            .iter()
            .map(|address| {
                Backend::new(address, client.clone(), forward, freshness).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for backend in &backends {
            tracing::debug!(id = %backend.id, url = %backend.url, "Registered backend");
        }

        Ok(Self { backends })
    }

    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn healthy_count(&self) -> usize {
        self.backends
            .iter()
            .filter(|b| b.health().is_alive())
            .count()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_address_order() {
        let pool =
            BackendPool::from_addresses(&["http://a.local", "http://b.local", "http://c.local"])
                .unwrap();
        let ids: Vec<_> = pool.all_backends().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a.local:80", "b.local:80", "c.local:80"]);
        assert_eq!(pool.healthy_count(), 3);
    }

    #[tokio::test]
    async fn construction_errors() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            BackendPool::from_addresses(&empty),
            Err(ConfigError::EmptyPool)
        ));
        assert!(matches!(
            BackendPool::from_addresses(&["http://ok.local", "not a url"]),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }
}
