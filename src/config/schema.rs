//! Configuration schema definitions.
//!
//! This module defines the complete resilience policy for the connection layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration, loaded once at process start.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResiliencePolicy {
    /// Database connection settings.
    pub database: DatabaseConfig,

    /// Circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry backoff settings.
    pub backoff: BackoffConfig,

    /// Periodic health check settings.
    pub health_check: HealthCheckConfig,

    /// Network connectivity monitoring.
    pub network: NetworkConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator HTTP surface.
    pub admin: AdminConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (`postgres://...`, `sqlite::memory:`).
    pub url: String,

    /// Maximum pooled connections.
    pub max_connections: u32,

    /// Time allowed to establish or check out one connection, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 10,
            connect_timeout_secs: 15,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures before the circuit opens.
    pub failure_threshold: u32,

    /// Cooldown before an open circuit admits trial calls, in milliseconds.
    pub open_to_half_open_delay_ms: u64,

    /// Trial calls admitted while half-open.
    pub half_open_max_attempts: u32,

    /// Consecutive half-open successes needed to close.
    pub success_threshold: u32,

    /// Amount subtracted from the failure count on each success while closed.
    /// Zero disables decay.
    pub success_decay: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_to_half_open_delay_ms: 5 * 60 * 1000,
            half_open_max_attempts: 3,
            success_threshold: 2,
            success_decay: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_to_half_open_delay(&self) -> Duration {
        Duration::from_millis(self.open_to_half_open_delay_ms)
    }
}

/// Exponential backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Upper bound of the uniform random jitter added to each delay.
    pub max_jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_delay_ms: 10 * 60 * 1000,
            max_retries: 10,
            backoff_multiplier: 2.0,
            max_jitter_ms: 1_000,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            timeout_secs: 30,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Network connectivity monitoring.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Settle time after a link change before re-evaluating, in milliseconds.
    pub network_change_delay_ms: u64,

    /// Host probed for internet reachability.
    pub connectivity_check_host: String,

    /// Port probed for internet reachability.
    pub connectivity_check_port: u16,

    /// Timeout for one reachability probe, in milliseconds.
    pub connectivity_check_timeout_ms: u64,

    /// Interval of the periodic reachability probe, in seconds.
    pub probe_interval_secs: u64,

    /// How often the OS link state is sampled, in milliseconds.
    pub link_poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_change_delay_ms: 5_000,
            connectivity_check_host: "8.8.8.8".to_string(),
            connectivity_check_port: 53,
            connectivity_check_timeout_ms: 5_000,
            probe_interval_secs: 30,
            link_poll_interval_ms: 1_000,
        }
    }
}

impl NetworkConfig {
    pub fn network_change_delay(&self) -> Duration {
        Duration::from_millis(self.network_change_delay_ms)
    }

    pub fn connectivity_check_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity_check_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn link_poll_interval(&self) -> Duration {
        Duration::from_millis(self.link_poll_interval_ms)
    }

    /// `host:port` string for the reachability probe.
    pub fn connectivity_check_target(&self) -> String {
        format!("{}:{}", self.connectivity_check_host, self.connectivity_check_port)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            api_key: String::new(),
        }
    }
}
