// src/proxy/backend.rs
use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::time::Duration;
use url::Url;

use super::proxy::{HttpClient, ProxyError, ReverseProxy};
use crate::config::{parse_backend_address, ConfigError, ForwardConfig};
use crate::health::{HealthState, HealthStatus};

/// A forwardable upstream target.
///
/// `is_alive` is consulted on the selection hot path and must return
/// immediately. `forward` performs one request/response exchange and turns
/// every upstream failure into a `ProxyError`.
#[async_trait]
pub trait Upstream: Send + Sync {
    fn address(&self) -> &str;

    fn is_alive(&self) -> bool;

    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

/// Reverse-proxying target for one configured backend address.
pub struct Backend {
    pub id: String,
    pub url: Url,
    address: String,
    proxy: ReverseProxy,
    health: HealthState,
}

impl Backend {
    pub fn new(
        address: &str,
        client: HttpClient,
        forward: &ForwardConfig,
        freshness: Duration,
    ) -> Result<Self, ConfigError> {
        let url = parse_backend_address(address)?;
        let id = format!(
            "{}:{}",
            url.host_str().unwrap_or("unknown"),
            url.port_or_known_default().unwrap_or(80)
        );
        let proxy = ReverseProxy::new(
            url.clone(),
            client,
            forward.timeout(),
            forward.idle_timeout(),
        );

        Ok(Self {
            id,
            url,
            address: address.trim().to_string(),
            proxy,
            health: HealthState::new(freshness),
        })
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health.status()
    }
}

#[async_trait]
impl Upstream for Backend {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        self.proxy.forward(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::build_client;

    fn backend(address: &str) -> Result<Backend, ConfigError> {
        Backend::new(
            address,
            build_client(),
            &ForwardConfig::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn identity_comes_from_address() {
        let b = backend("https://github.com").unwrap();
        assert_eq!(b.address(), "https://github.com");
        assert_eq!(b.id, "github.com:443");

        let b = backend("http://127.0.0.1:9001").unwrap();
        assert_eq!(b.id, "127.0.0.1:9001");
    }

    #[tokio::test]
    async fn alive_until_health_checks_say_otherwise() {
        let b = backend("http://127.0.0.1:9001").unwrap();
        assert!(b.is_alive());
        b.health().record(false, 1, 1);
        assert!(!b.is_alive());
        assert_eq!(b.health_status(), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        assert!(matches!(
            backend("not a url"),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }
}
