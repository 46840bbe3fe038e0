//! Shared fixtures for the integration suites: a configurable stub
//! repository, entity builders, a recording backend server and a fully
//! wired dispatcher.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{Router, body::Body, extract::Request, response::Response};
use chrono::Utc;
use http::HeaderMap;
use junction::{
    HttpClientAdapter, HttpHandler, MemoryStore, ReloadCoordinator,
    config::models::TransportConfig,
    core::{
        entities::{ApiKey, Consumer, PluginConfig, PluginScope, Route, Service, ServiceTarget},
        plugin::{builtin::register_builtins, registry::Registry},
        snapshot::{self, SnapshotHolder},
    },
    ports::{
        http_client::HttpClient,
        ratelimit_store::RateLimitStore,
        repository::{ConfigRepository, RepositoryError, RepositoryResult},
    },
};

/// Repository stub whose contents can be swapped between reloads.
#[derive(Default)]
pub struct StubRepo {
    pub services: Mutex<Vec<Service>>,
    pub routes: Mutex<Vec<Route>>,
    pub plugins: Mutex<Vec<PluginConfig>>,
    pub fail: Mutex<bool>,
}

impl StubRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_services(&self, services: Vec<Service>) {
        *self.services.lock().unwrap() = services;
    }

    pub fn set_routes(&self, routes: Vec<Route>) {
        *self.routes.lock().unwrap() = routes;
    }

    pub fn set_plugins(&self, plugins: Vec<PluginConfig>) {
        *self.plugins.lock().unwrap() = plugins;
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn check(&self) -> RepositoryResult<()> {
        if *self.fail.lock().unwrap() {
            Err(RepositoryError::Unreachable("stub repository down".into()))
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
        Ok(self.plugins.lock().unwrap().clone())
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
    async fn get_targets_for_service(&self, _: &str) -> RepositoryResult<Vec<ServiceTarget>> {
        Ok(vec![])
    }
}

pub fn service(id: &str, addr: SocketAddr) -> Service {
    Service {
        id: id.into(),
        name: id.into(),
        protocol: "http".into(),
        host: addr.ip().to_string(),
        port: addr.port(),
        path: None,
        connect_timeout_ms: 2_000,
        read_timeout_ms: 5_000,
        write_timeout_ms: 5_000,
        retries: 0,
        load_balancer_type: "round-robin".into(),
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn route(id: &str, service_id: &str, paths: &[&str]) -> Route {
    Route {
        id: id.into(),
        service_id: service_id.into(),
        name: Some(id.into()),
        hosts: vec![],
        paths: paths.iter().map(|p| p.to_string()).collect(),
        methods: vec![],
        strip_path: false,
        preserve_host: false,
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn plugin_config(
    id: &str,
    name: &str,
    priority: i32,
    config: serde_json::Value,
) -> PluginConfig {
    PluginConfig {
        id: id.into(),
        name: name.into(),
        scope: PluginScope::Global,
        service_id: None,
        route_id: None,
        consumer_id: None,
        config,
        priority,
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// What the backend saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: HeaderMap,
}

/// Spawn a backend that records every request and answers 200 "ok".
pub async fn spawn_backend() -> (SocketAddr, Arc<Mutex<Vec<RecordedRequest>>>) {
    let recorded: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = recorded.clone();

    let app = Router::new().fallback(move |req: Request| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(RecordedRequest {
                method: req.method().to_string(),
                path_and_query: req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.to_string())
                    .unwrap_or_default(),
                headers: req.headers().clone(),
            });
            Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"backend":"ok"}"#))
                .unwrap()
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, recorded)
}

/// Everything a test needs to drive the dispatcher.
pub struct TestGateway {
    pub handler: HttpHandler,
    pub holder: SnapshotHolder,
    pub coordinator: Arc<ReloadCoordinator>,
    pub repo: Arc<StubRepo>,
    pub ratelimit_store: Arc<MemoryStore>,
}

/// Wire a full gateway over the stub repository: builtin plugins, the
/// in-memory rate-limit store and the real pooled HTTP client.
pub async fn gateway(repo: Arc<StubRepo>) -> TestGateway {
    let ratelimit_store = Arc::new(MemoryStore::new());

    let mut registry = Registry::new();
    register_builtins(
        &mut registry,
        ratelimit_store.clone() as Arc<dyn RateLimitStore>,
    );
    let registry = Arc::new(registry);

    let holder = snapshot::empty_holder();
    let coordinator = Arc::new(ReloadCoordinator::new(
        repo.clone(),
        registry,
        holder.clone(),
    ));
    coordinator.reload().await.expect("initial reload");

    let client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new(&TransportConfig::default()).unwrap());
    let handler = HttpHandler::new(
        holder.clone(),
        client,
        repo.clone(),
        ratelimit_store.clone() as Arc<dyn RateLimitStore>,
    );

    TestGateway {
        handler,
        holder,
        coordinator,
        repo,
        ratelimit_store,
    }
}

pub const CLIENT_ADDR: &str = "9.9.9.9:55000";

pub fn client_addr() -> SocketAddr {
    CLIENT_ADDR.parse().unwrap()
}
