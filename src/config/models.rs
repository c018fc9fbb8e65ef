// src/config/models.rs
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("backend list is empty, at least one upstream is required")]
    EmptyPool,

    #[error("invalid backend address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::EmptyPool);
        }
        for backend in &self.backends {
            parse_backend_address(&backend.url)?;
        }

        self.server.socket_addr()?;

        if self.forward.timeout_secs == 0 || self.forward.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "forward timeouts must be greater than zero".into(),
            ));
        }

        let hc = &self.health_check;
        if hc.enabled {
            if hc.interval_secs == 0 || hc.timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "health_check interval and timeout must be greater than zero".into(),
                ));
            }
            if hc.healthy_threshold == 0 || hc.unhealthy_threshold == 0 {
                return Err(ConfigError::Invalid(
                    "health_check thresholds must be greater than zero".into(),
                ));
            }
            // A judgment that expires before the next check leaves every backend Unknown.
            if hc.freshness() < hc.interval() {
                return Err(ConfigError::Invalid(
                    "health_check freshness_secs must be at least interval_secs".into(),
                ));
            }
        }

        if let Some(cb) = &self.circuit_breaker {
            if cb.failure_threshold == 0 || cb.success_threshold == 0 {
                return Err(ConfigError::Invalid(
                    "circuit_breaker thresholds must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Parses one configured upstream address. Only absolute `http`/`https`
/// URLs with a host are accepted.
pub fn parse_backend_address(address: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let url = Url::parse(address.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(url)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long in-flight connections get to finish after shutdown is signalled.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server address: {e}")))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Upper bound on the wait for the upstream response head.
    #[serde(default = "default_forward_timeout")]
    pub timeout_secs: u64,
    /// Upper bound on the gap between two streamed body chunks.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_forward_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
    /// How long a check result stays authoritative. Defaults to three intervals.
    #[serde(default)]
    pub freshness_secs: Option<u64>,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(
            self.freshness_secs
                .unwrap_or_else(|| self.interval_secs.saturating_mul(3)),
        )
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval(),
            timeout_secs: default_health_timeout(),
            path: default_health_path(),
            healthy_threshold: default_threshold(),
            unhealthy_threshold: default_threshold(),
            freshness_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_threshold(),
            timeout_secs: default_breaker_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_forward_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_interval() -> u64 {
    10
}

fn default_health_timeout() -> u64 {
    2
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_threshold() -> u32 {
    2
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    30
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
