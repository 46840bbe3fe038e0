//! Routing snapshots and the reload coordinator.
//!
//! A snapshot is the immutable triple every request resolves against: the
//! routing index (with its service map) plus the ordered plugin-instance
//! list. Publication is a single atomic pointer swap; requests in flight
//! keep the `Arc` they loaded until they finish, so a reload never mixes
//! old routes with new plugins inside one request.
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use eyre::WrapErr;

use crate::{
    core::{
        plugin::{
            PluginInstance,
            registry::{Registry, ScopeCounts, scope_counts},
        },
        router::RouteMatcher,
    },
    ports::repository::ConfigRepository,
};

/// The immutable state a single request is served from.
pub struct RoutingSnapshot {
    pub matcher: RouteMatcher,
    pub plugins: Vec<PluginInstance>,
    pub built_at: DateTime<Utc>,
}

impl RoutingSnapshot {
    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            routes: self.matcher.route_count(),
            services: self.matcher.service_count(),
            plugins: self.plugins.len(),
            plugins_by_scope: scope_counts(&self.plugins),
            built_at: self.built_at,
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SnapshotStats {
    pub routes: usize,
    pub services: usize,
    pub plugins: usize,
    pub plugins_by_scope: ScopeCounts,
    pub built_at: DateTime<Utc>,
}

/// Swap point read by every request handler. `None` until the first
/// successful load, which is what `/ready` reports on.
pub type SnapshotHolder = Arc<ArcSwapOption<RoutingSnapshot>>;

pub fn empty_holder() -> SnapshotHolder {
    Arc::new(ArcSwapOption::empty())
}

/// Builds snapshots from the store and publishes them atomically.
///
/// A build that fails structurally (store unreachable mid-read) is
/// abandoned and the previous snapshot stays current. Individual plugin
/// construction failures never block publication — the registry already
/// skipped them with a recorded error.
pub struct ReloadCoordinator {
    repo: Arc<dyn ConfigRepository>,
    registry: Arc<Registry>,
    holder: SnapshotHolder,
}

impl ReloadCoordinator {
    pub fn new(
        repo: Arc<dyn ConfigRepository>,
        registry: Arc<Registry>,
        holder: SnapshotHolder,
    ) -> Self {
        Self {
            repo,
            registry,
            holder,
        }
    }

    pub fn holder(&self) -> SnapshotHolder {
        self.holder.clone()
    }

    /// Build a fresh snapshot and publish it.
    pub async fn reload(&self) -> eyre::Result<SnapshotStats> {
        let snapshot = self.build().await?;
        let stats = snapshot.stats();
        self.holder.store(Some(Arc::new(snapshot)));

        tracing::info!(
            routes = stats.routes,
            services = stats.services,
            plugins = stats.plugins,
            "snapshot published"
        );
        Ok(stats)
    }

    /// Fetch everything the snapshot needs; any store failure abandons the
    /// build.
    async fn build(&self) -> eyre::Result<RoutingSnapshot> {
        let plugins = self
            .registry
            .load_from_store(self.repo.as_ref())
            .await
            .wrap_err("failed to load plugin configurations")?;

        let services = self
            .repo
            .get_services(false)
            .await
            .wrap_err("failed to load services")?;
        let routes = self
            .repo
            .get_routes(false)
            .await
            .wrap_err("failed to load routes")?;

        let matcher = RouteMatcher::build(routes, services);

        Ok(RoutingSnapshot {
            matcher,
            plugins,
            built_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::{
        core::entities::{ApiKey, Consumer, PluginConfig, Route, Service, ServiceTarget},
        ports::repository::{RepositoryError, RepositoryResult},
    };

    /// Repository whose contents can be swapped between reloads, plus a
    /// failure switch.
    struct StubRepo {
        services: Mutex<Vec<Service>>,
        routes: Mutex<Vec<Route>>,
        fail: Mutex<bool>,
    }

    impl StubRepo {
        fn new() -> Self {
            Self {
                services: Mutex::new(vec![]),
                routes: Mutex::new(vec![]),
                fail: Mutex::new(false),
            }
        }

        fn set_routes(&self, routes: Vec<Route>) {
            *self.routes.lock().unwrap() = routes;
        }

        fn set_services(&self, services: Vec<Service>) {
            *self.services.lock().unwrap() = services;
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn check(&self) -> RepositoryResult<()> {
            if *self.fail.lock().unwrap() {
                Err(RepositoryError::Unreachable("stub down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ConfigRepository for StubRepo {
        async fn ping(&self) -> RepositoryResult<()> {
            self.check()
        }
        async fn get_services(&self, _: bool) -> RepositoryResult<Vec<Service>> {
            self.check()?;
            Ok(self.services.lock().unwrap().clone())
        }
        async fn get_routes(&self, _: bool) -> RepositoryResult<Vec<Route>> {
            self.check()?;
            Ok(self.routes.lock().unwrap().clone())
        }
        async fn get_plugins(&self, _: bool) -> RepositoryResult<Vec<PluginConfig>> {
            self.check()?;
            Ok(vec![])
        }
        async fn get_service_by_id(&self, _: &str) -> RepositoryResult<Option<Service>> {
            Ok(None)
        }
        async fn get_route_by_id(&self, _: &str) -> RepositoryResult<Option<Route>> {
            Ok(None)
        }
        async fn get_consumer_by_id(&self, _: &str) -> RepositoryResult<Option<Consumer>> {
            Ok(None)
        }
        async fn get_api_key_by_hash(&self, _: &str) -> RepositoryResult<Option<ApiKey>> {
            Ok(None)
        }
        async fn get_targets_for_service(
            &self,
            _: &str,
        ) -> RepositoryResult<Vec<ServiceTarget>> {
            Ok(vec![])
        }
    }

    fn route(id: &str, path: &str) -> Route {
        Route {
            id: id.into(),
            service_id: "s1".into(),
            name: None,
            hosts: vec![],
            paths: vec![path.into()],
            methods: vec![],
            strip_path: false,
            preserve_host: false,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(id: &str) -> Service {
        Service {
            id: id.into(),
            name: id.into(),
            protocol: "http".into(),
            host: "backend".into(),
            port: 80,
            path: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30000,
            write_timeout_ms: 30000,
            retries: 0,
            load_balancer_type: "round-robin".into(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn coordinator(repo: Arc<StubRepo>) -> ReloadCoordinator {
        ReloadCoordinator::new(repo, Arc::new(Registry::new()), empty_holder())
    }

    #[tokio::test]
    async fn reload_publishes_a_snapshot() {
        let repo = Arc::new(StubRepo::new());
        repo.set_services(vec![service("s1")]);
        repo.set_routes(vec![route("r1", "/api")]);

        let coordinator = coordinator(repo);
        let holder = coordinator.holder();
        assert!(holder.load().is_none());

        let stats = coordinator.reload().await.unwrap();
        assert_eq!(stats.routes, 1);
        assert_eq!(stats.plugins_by_scope, ScopeCounts::default());
        assert!(holder.load().is_some());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_snapshot() {
        let repo = Arc::new(StubRepo::new());
        repo.set_services(vec![service("s1")]);
        repo.set_routes(vec![route("r1", "/api")]);

        let coordinator = coordinator(repo.clone());
        let holder = coordinator.holder();
        coordinator.reload().await.unwrap();
        let first = holder.load_full().unwrap();

        repo.set_failing(true);
        assert!(coordinator.reload().await.is_err());

        let still = holder.load_full().unwrap();
        assert_eq!(first.built_at, still.built_at);
    }

    #[tokio::test]
    async fn reload_swaps_route_set_completely() {
        let repo = Arc::new(StubRepo::new());
        repo.set_services(vec![service("s1")]);
        repo.set_routes(vec![route("r1", "/api/v1")]);

        let coordinator = coordinator(repo.clone());
        let holder = coordinator.holder();
        coordinator.reload().await.unwrap();

        // An in-flight request holds the old snapshot across the swap.
        let old = holder.load_full().unwrap();

        repo.set_routes(vec![route("r2", "/api/v2/*")]);
        coordinator.reload().await.unwrap();
        let new = holder.load_full().unwrap();

        assert!(old
            .matcher
            .matches(&http::Method::GET, "/api/v1", None)
            .is_ok());
        assert!(new
            .matcher
            .matches(&http::Method::GET, "/api/v1", None)
            .is_err());
        assert!(new
            .matcher
            .matches(&http::Method::GET, "/api/v2/ping", None)
            .is_ok());
    }
}
