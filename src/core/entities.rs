//! Configuration entities read from the control-plane store.
//!
//! These types are the gateway's view of the six record sets the Admin API
//! manages. The gateway only ever reads them; all mutation happens in the
//! control plane, which announces changes over the pub/sub channel.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A backend destination the gateway proxies to.
///
/// Every [`Route`] points at exactly one service. A disabled service makes
/// matches through its routes behave as non-matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// `http` or `https`.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Optional base path prepended to every upstream request.
    pub path: Option<String>,
    pub connect_timeout_ms: i32,
    pub read_timeout_ms: i32,
    pub write_timeout_ms: i32,
    pub retries: i32,
    pub load_balancer_type: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Authority string for the upstream URL, omitting default ports.
    pub fn authority(&self) -> String {
        match (self.protocol.as_str(), self.port) {
            ("http", 80) | ("https", 443) => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

/// A matching rule binding inbound requests to a [`Service`].
///
/// Invariants enforced at load time: at least one path pattern; an empty
/// method list means any method; an empty host list means any host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub service_id: String,
    pub name: Option<String>,
    /// Host patterns, supporting `*.suffix` wildcards. Empty = any host.
    pub hosts: Vec<String>,
    /// Path patterns: static segments, `:name` parameters, trailing `*`.
    pub paths: Vec<String>,
    /// Allowed methods. Empty = any method.
    pub methods: Vec<String>,
    /// Trim the matched pattern's literal prefix before proxying.
    pub strip_path: bool,
    /// Forward the inbound `Host` header instead of the upstream authority.
    pub preserve_host: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a plugin configuration applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginScope {
    Global,
    Service,
    Route,
    /// Loaded but never activated in this phase of the system.
    Consumer,
}

impl std::fmt::Display for PluginScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginScope::Global => "global",
            PluginScope::Service => "service",
            PluginScope::Route => "route",
            PluginScope::Consumer => "consumer",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PluginScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(PluginScope::Global),
            "service" => Ok(PluginScope::Service),
            "route" => Ok(PluginScope::Route),
            "consumer" => Ok(PluginScope::Consumer),
            other => Err(format!("unknown plugin scope: {other}")),
        }
    }
}

/// A stored plugin configuration row.
///
/// `config` is an opaque JSON document interpreted by the plugin factory.
/// The `critical` flag lives inside that document, not in a column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    /// Plugin kind, e.g. `cors`, `request-logger`, `rate-limit`.
    pub name: String,
    pub scope: PluginScope,
    pub service_id: Option<String>,
    pub route_id: Option<String>,
    pub consumer_id: Option<String>,
    pub config: serde_json::Value,
    /// Lower runs earlier in the BeforeRequest phase.
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An API client (application or service), not an end user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumer {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub custom_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An authentication credential for a consumer.
///
/// Only the SHA-256 digest of the key is ever stored or compared; the raw
/// value exists nowhere in the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub consumer_id: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A backend instance registered under a service.
///
/// Single-target forwarding uses the service's own host/port; targets are
/// read for completeness and future balancing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub id: String,
    pub service_id: String,
    /// `host:port` form.
    pub target: String,
    pub weight: i32,
    pub health_check_path: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}
