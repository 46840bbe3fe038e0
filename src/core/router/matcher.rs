//! Request-to-route matching over the radix index.
//!
//! The matcher layers method and host filtering on top of the path tree and
//! resolves the target service. Any failure along the way is a plain
//! not-found to the client so that the gateway never leaks which routes
//! exist behind which methods or hosts.
use std::{collections::HashMap, sync::Arc};

use http::Method;
use thiserror::Error;

use crate::core::{
    entities::{Route, Service},
    router::radix::{self, PathParams, RadixTree},
};

/// Route-resolution failure. Every variant surfaces to the client as 404.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no route found for path: {0}")]
    NoRoute(String),
    #[error("no route found for {method} {path}")]
    MethodNotAllowed { method: Method, path: String },
    #[error("no route found for host {host} on path {path}")]
    HostMismatch { host: String, path: String },
    #[error("service {service_id} for route {route_id} is missing or disabled")]
    ServiceUnavailable { route_id: String, service_id: String },
}

/// Outcome of a successful match.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub route: Arc<Route>,
    pub service: Arc<Service>,
    pub params: PathParams,
}

/// Immutable routing index: radix tree plus route and service lookups.
///
/// Built once per reload and shared read-only by every request for the
/// lifetime of its snapshot.
#[derive(Debug)]
pub struct RouteMatcher {
    tree: RadixTree,
    routes: HashMap<String, Arc<Route>>,
    services: HashMap<String, Arc<Service>>,
}

impl RouteMatcher {
    /// Build a matcher from enabled routes and the full service set.
    ///
    /// Disabled routes are skipped at build time; disabled services stay in
    /// the map and are rejected per-request so a service toggle does not
    /// require dropping its routes from the tree.
    pub fn build(routes: Vec<Route>, services: Vec<Service>) -> Self {
        let services: HashMap<String, Arc<Service>> = services
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();

        let mut tree = RadixTree::new();
        let mut route_map = HashMap::new();
        let mut enabled = 0usize;

        for route in routes {
            if !route.enabled {
                continue;
            }
            let route = Arc::new(route);
            for pattern in &route.paths {
                tree.insert(pattern, &route.id);
            }
            route_map.insert(route.id.clone(), route);
            enabled += 1;
        }

        tracing::info!(
            routes = enabled,
            services = services.len(),
            tree_size = tree.len(),
            "routing index built"
        );

        Self {
            tree,
            routes: route_map,
            services,
        }
    }

    /// Match a request by path, method and host.
    pub fn matches(
        &self,
        method: &Method,
        path: &str,
        host: Option<&str>,
    ) -> Result<MatchResult, MatchError> {
        let path = radix::normalize_path(path);

        let (route_id, params) = self
            .tree
            .search(&path)
            .ok_or_else(|| MatchError::NoRoute(path.clone()))?;

        let route = self
            .routes
            .get(route_id)
            .cloned()
            .ok_or_else(|| MatchError::NoRoute(path.clone()))?;

        if !method_allowed(&route, method) {
            return Err(MatchError::MethodNotAllowed {
                method: method.clone(),
                path,
            });
        }

        let host = host.unwrap_or_default();
        if !host_matches(&route, host) {
            return Err(MatchError::HostMismatch {
                host: host.to_string(),
                path,
            });
        }

        let service = self
            .services
            .get(&route.service_id)
            .filter(|s| s.enabled)
            .cloned()
            .ok_or_else(|| MatchError::ServiceUnavailable {
                route_id: route.id.clone(),
                service_id: route.service_id.clone(),
            })?;

        Ok(MatchResult {
            route,
            service,
            params,
        })
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

fn method_allowed(route: &Route, method: &Method) -> bool {
    route.methods.is_empty() || route.methods.iter().any(|m| m == method.as_str())
}

/// Host filtering with `*.suffix` subdomain patterns. The request host is
/// compared with its port stripped; `*.example.com` admits `example.com`
/// itself and any host ending in `.example.com`.
fn host_matches(route: &Route, request_host: &str) -> bool {
    if route.hosts.is_empty() {
        return true;
    }

    let host = request_host
        .rsplit_once(':')
        .map_or(request_host, |(h, _)| h);

    route.hosts.iter().any(|pattern| {
        if host == pattern {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return host == suffix || host.ends_with(&format!(".{suffix}"));
        }
        false
    })
}
