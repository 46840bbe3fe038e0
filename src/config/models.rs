//! Process configuration data structures.
//!
//! These map to TOML/YAML/JSON config files with environment-variable
//! overrides. They configure the process itself — listener, store
//! endpoints, transport tuning, logging. Routes, services and plugins are
//! not here: those live in the configuration store and arrive through the
//! repository.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/junction".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_change_channel() -> String {
    "gateway:config:changes".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the listener binds, `IP:PORT`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Configuration store (PostgreSQL) connection string.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Rate-limit store and change-feed (Redis) connection string.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Pub/sub channel carrying change notifications.
    #[serde(default = "default_change_channel")]
    pub change_channel: String,

    /// `trace` | `debug` | `info` | `warn` | `error`, or a full
    /// EnvFilter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json` or `console`.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Grace period for in-flight requests on shutdown (humantime).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_url: default_database_url(),
            redis_url: default_redis_url(),
            change_channel: default_change_channel(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            shutdown_timeout: default_shutdown_timeout(),
            transport: TransportConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        humantime::parse_duration(&self.shutdown_timeout)
            .unwrap_or_else(|_| Duration::from_secs(30))
    }
}

/// Tuning for the shared upstream connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound on idle pooled connections per upstream host.
    pub max_idle_per_host: usize,
    /// Dial (TCP connect) timeout in milliseconds.
    pub dial_timeout_ms: u64,
    /// TCP keep-alive interval in seconds.
    pub keepalive_secs: u64,
    /// How long an idle pooled connection is kept before closing.
    pub idle_timeout_secs: u64,
    /// Fallback response-header timeout when a service specifies none.
    pub default_read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            dial_timeout_ms: 10_000,
            keepalive_secs: 30,
            idle_timeout_secs: 90,
            default_read_timeout_ms: 30_000,
        }
    }
}
