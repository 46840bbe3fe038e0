//! Port for read-only access to the configuration store.
//!
//! The gateway never writes configuration; the control plane owns CRUD and
//! announces changes over the pub/sub channel. Only the service, route and
//! plugin reads sit on the hot reload path — the consumer, api-key and
//! target reads exist for adapter plugins.
use async_trait::async_trait;
use thiserror::Error;

use crate::core::entities::{ApiKey, Consumer, PluginConfig, Route, Service, ServiceTarget};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("store query failed: {0}")]
    Query(String),

    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("malformed row: {0}")]
    Malformed(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Strongly-typed reads over the six configuration record sets.
#[async_trait]
pub trait ConfigRepository: Send + Sync + 'static {
    /// Liveness probe against the store, used by `/health` and `/ready`.
    async fn ping(&self) -> RepositoryResult<()>;

    /// (total, idle) pool connections, when the backend pools. Reported by
    /// `/health`.
    fn pool_stats(&self) -> Option<(u32, usize)> {
        None
    }

    async fn get_services(&self, include_disabled: bool) -> RepositoryResult<Vec<Service>>;

    async fn get_routes(&self, include_disabled: bool) -> RepositoryResult<Vec<Route>>;

    /// Enabled plugin configurations, ordered for deterministic loading.
    async fn get_plugins(&self, enabled_only: bool) -> RepositoryResult<Vec<PluginConfig>>;

    async fn get_service_by_id(&self, id: &str) -> RepositoryResult<Option<Service>>;

    async fn get_route_by_id(&self, id: &str) -> RepositoryResult<Option<Route>>;

    async fn get_consumer_by_id(&self, id: &str) -> RepositoryResult<Option<Consumer>>;

    /// Look up an API key by its SHA-256 digest. Raw keys never reach the
    /// store.
    async fn get_api_key_by_hash(&self, key_hash: &str) -> RepositoryResult<Option<ApiKey>>;

    async fn get_targets_for_service(
        &self,
        service_id: &str,
    ) -> RepositoryResult<Vec<ServiceTarget>>;
}
