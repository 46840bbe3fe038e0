//! PostgreSQL configuration repository.
//!
//! Read-only: the gateway never writes these tables. Row mapping is
//! explicit so a schema drift fails loudly as a malformed-row error
//! instead of silently defaulting fields.
use async_trait::async_trait;
use sqlx::{
    Row,
    postgres::{PgPool, PgPoolOptions, PgRow},
};

use crate::{
    core::entities::{ApiKey, Consumer, PluginConfig, Route, Service, ServiceTarget},
    ports::repository::{ConfigRepository, RepositoryError, RepositoryResult},
};

const SERVICE_COLUMNS: &str = "id, name, protocol, host, port, path, \
     connect_timeout_ms, read_timeout_ms, write_timeout_ms, retries, \
     load_balancer_type, enabled, created_at, updated_at";

const ROUTE_COLUMNS: &str = "id, service_id, name, hosts, paths, methods, \
     strip_path, preserve_host, enabled, created_at, updated_at";

pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect with a bounded pool and verify reachability.
    pub async fn connect(database_url: &str, max_connections: u32) -> eyre::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| eyre::eyre!("database connection failed: {e}"))?;

        tracing::info!(max_connections, "configuration store connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_service(row: &PgRow) -> RepositoryResult<Service> {
        Ok(Service {
            id: get(row, "id")?,
            name: get(row, "name")?,
            protocol: get(row, "protocol")?,
            host: get(row, "host")?,
            port: get::<i32>(row, "port")? as u16,
            path: get(row, "path")?,
            connect_timeout_ms: get(row, "connect_timeout_ms")?,
            read_timeout_ms: get(row, "read_timeout_ms")?,
            write_timeout_ms: get(row, "write_timeout_ms")?,
            retries: get(row, "retries")?,
            load_balancer_type: get(row, "load_balancer_type")?,
            enabled: get(row, "enabled")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn map_route(row: &PgRow) -> RepositoryResult<Route> {
        Ok(Route {
            id: get(row, "id")?,
            service_id: get(row, "service_id")?,
            name: get(row, "name")?,
            hosts: get::<Option<Vec<String>>>(row, "hosts")?.unwrap_or_default(),
            paths: get(row, "paths")?,
            methods: get::<Option<Vec<String>>>(row, "methods")?.unwrap_or_default(),
            strip_path: get(row, "strip_path")?,
            preserve_host: get(row, "preserve_host")?,
            enabled: get(row, "enabled")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }

    fn map_plugin(row: &PgRow) -> RepositoryResult<PluginConfig> {
        let scope: String = get(row, "scope")?;
        let scope = scope
            .parse()
            .map_err(|e: String| RepositoryError::Malformed(e))?;

        Ok(PluginConfig {
            id: get(row, "id")?,
            name: get(row, "name")?,
            scope,
            service_id: get(row, "service_id")?,
            route_id: get(row, "route_id")?,
            consumer_id: get(row, "consumer_id")?,
            config: get::<Option<serde_json::Value>>(row, "config")?
                .unwrap_or_else(|| serde_json::json!({})),
            priority: get(row, "priority")?,
            enabled: get(row, "enabled")?,
            created_at: get(row, "created_at")?,
            updated_at: get(row, "updated_at")?,
        })
    }
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>>(
    row: &'r PgRow,
    column: &str,
) -> RepositoryResult<T> {
    row.try_get(column)
        .map_err(|e| RepositoryError::Malformed(format!("column '{column}': {e}")))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            RepositoryError::Unreachable(e.to_string())
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

#[async_trait]
impl ConfigRepository for PostgresRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(query_err)
    }

    fn pool_stats(&self) -> Option<(u32, usize)> {
        Some((self.pool.size(), self.pool.num_idle()))
    }

    async fn get_services(&self, include_disabled: bool) -> RepositoryResult<Vec<Service>> {
        let query = format!(
            "SELECT {SERVICE_COLUMNS} FROM services \
             WHERE enabled = true OR $1 = true ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(include_disabled)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        rows.iter().map(Self::map_service).collect()
    }

    async fn get_routes(&self, include_disabled: bool) -> RepositoryResult<Vec<Route>> {
        let query = format!(
            "SELECT {ROUTE_COLUMNS} FROM routes \
             WHERE enabled = true OR $1 = true ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(include_disabled)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        rows.iter().map(Self::map_route).collect()
    }

    async fn get_plugins(&self, enabled_only: bool) -> RepositoryResult<Vec<PluginConfig>> {
        let rows = sqlx::query(
            "SELECT id, name, scope, service_id, route_id, consumer_id, \
                    config, priority, enabled, created_at, updated_at \
             FROM plugins WHERE enabled = true OR $1 = false \
             ORDER BY priority ASC, created_at ASC",
        )
        .bind(enabled_only)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter().map(Self::map_plugin).collect()
    }

    async fn get_service_by_id(&self, id: &str) -> RepositoryResult<Option<Service>> {
        let query = format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.as_ref().map(Self::map_service).transpose()
    }

    async fn get_route_by_id(&self, id: &str) -> RepositoryResult<Option<Route>> {
        let query = format!("SELECT {ROUTE_COLUMNS} FROM routes WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.as_ref().map(Self::map_route).transpose()
    }

    async fn get_consumer_by_id(&self, id: &str) -> RepositoryResult<Option<Consumer>> {
        let row = sqlx::query(
            "SELECT id, username, email, custom_id, metadata, created_at, updated_at \
             FROM consumers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        row.map(|row| {
            Ok(Consumer {
                id: get(&row, "id")?,
                username: get(&row, "username")?,
                email: get(&row, "email")?,
                custom_id: get(&row, "custom_id")?,
                metadata: get(&row, "metadata")?,
                created_at: get(&row, "created_at")?,
                updated_at: get(&row, "updated_at")?,
            })
        })
        .transpose()
    }

    async fn get_api_key_by_hash(&self, key_hash: &str) -> RepositoryResult<Option<ApiKey>> {
        let row = sqlx::query(
            "SELECT id, consumer_id, key_hash, name, enabled, \
                    created_at, last_used_at, expires_at \
             FROM api_keys WHERE key_hash = $1 AND enabled = true",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;

        row.map(|row| {
            Ok(ApiKey {
                id: get(&row, "id")?,
                consumer_id: get(&row, "consumer_id")?,
                key_hash: get(&row, "key_hash")?,
                name: get(&row, "name")?,
                enabled: get(&row, "enabled")?,
                created_at: get(&row, "created_at")?,
                last_used_at: get(&row, "last_used_at")?,
                expires_at: get(&row, "expires_at")?,
            })
        })
        .transpose()
    }

    async fn get_targets_for_service(
        &self,
        service_id: &str,
    ) -> RepositoryResult<Vec<ServiceTarget>> {
        let rows = sqlx::query(
            "SELECT id, service_id, target, weight, health_check_path, enabled, created_at \
             FROM service_targets WHERE service_id = $1 AND enabled = true",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                Ok(ServiceTarget {
                    id: get(row, "id")?,
                    service_id: get(row, "service_id")?,
                    target: get(row, "target")?,
                    weight: get(row, "weight")?,
                    health_check_path: get(row, "health_check_path")?,
                    enabled: get(row, "enabled")?,
                    created_at: get(row, "created_at")?,
                })
            })
            .collect()
    }
}
