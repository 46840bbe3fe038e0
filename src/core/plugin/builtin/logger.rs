//! Request logger plugin.
//!
//! Emits one structured event when a request enters the chain and a second
//! when the response has been observed, correlated by a generated request
//! id stored in the context. Credential-bearing headers are redacted when
//! header logging is enabled.
use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use http::header;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::plugin::{Phase, Plugin, context::RequestContext};

const REQUEST_ID_KEY: &str = "request_id";

/// Headers never written to logs in the clear.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "proxy-authorization",
    "x-auth-token",
    "x-access-token",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub critical: bool,
    /// Headers may carry credentials; off by default.
    pub log_headers: bool,
    pub log_query: bool,
    /// Exact-match paths to skip, e.g. health probes.
    pub excluded_paths: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            critical: false,
            log_headers: false,
            log_query: true,
            excluded_paths: vec!["/health".into(), "/ready".into()],
        }
    }
}

pub struct RequestLoggerPlugin {
    config: LoggerConfig,
}

impl RequestLoggerPlugin {
    /// Factory registered under the `request-logger` kind name.
    pub fn factory(config: &serde_json::Value) -> eyre::Result<Arc<dyn Plugin>> {
        let config: LoggerConfig = serde_json::from_value(config.clone())
            .map_err(|e| eyre::eyre!("invalid request-logger config: {e}"))?;
        Ok(Arc::new(RequestLoggerPlugin { config }))
    }

    fn excluded(&self, path: &str) -> bool {
        self.config.excluded_paths.iter().any(|p| p == path)
    }

    fn redacted_headers(&self, headers: &http::HeaderMap) -> BTreeMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                let shown = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                    "[REDACTED]".to_string()
                } else {
                    value.to_str().unwrap_or("<binary>").to_string()
                };
                (name.to_string(), shown)
            })
            .collect()
    }

    fn log_request(&self, ctx: &mut RequestContext) {
        let request_id = Uuid::new_v4().to_string();
        ctx.set(REQUEST_ID_KEY, request_id.clone());

        let user_agent = ctx
            .request
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let query = if self.config.log_query {
            ctx.request.uri().query().unwrap_or_default().to_string()
        } else {
            String::new()
        };
        let headers = if self.config.log_headers {
            Some(self.redacted_headers(ctx.request.headers()))
        } else {
            None
        };

        tracing::info!(
            plugin = "request-logger",
            phase = "before_request",
            request_id = %request_id,
            method = %ctx.request.method(),
            path = ctx.request.uri().path(),
            remote_addr = ctx.client_addr.map(|a| a.to_string()).unwrap_or_default(),
            user_agent = %user_agent,
            query = %query,
            route_id = %ctx.route.id,
            service_id = %ctx.service.id,
            headers = ?headers,
            "request received"
        );
    }

    fn log_response(&self, ctx: &RequestContext) {
        let request_id = ctx.get_str(REQUEST_ID_KEY);
        let status = ctx.response.status().as_u16();
        let bytes = ctx.response.bytes_written();
        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        let method = ctx.request.method().to_string();
        let path = ctx.request.uri().path().to_string();

        if status >= 500 {
            tracing::error!(
                plugin = "request-logger",
                phase = "after_response",
                request_id = %request_id,
                method = %method,
                path = %path,
                status,
                bytes,
                elapsed_ms,
                route_id = %ctx.route.id,
                service_id = %ctx.service.id,
                "request failed with server error"
            );
        } else if status >= 400 {
            tracing::warn!(
                plugin = "request-logger",
                phase = "after_response",
                request_id = %request_id,
                method = %method,
                path = %path,
                status,
                bytes,
                elapsed_ms,
                route_id = %ctx.route.id,
                service_id = %ctx.service.id,
                "request completed with client error"
            );
        } else {
            tracing::info!(
                plugin = "request-logger",
                phase = "after_response",
                request_id = %request_id,
                method = %method,
                path = %path,
                status,
                bytes,
                elapsed_ms,
                route_id = %ctx.route.id,
                service_id = %ctx.service.id,
                "request completed"
            );
        }
    }
}

#[async_trait]
impl Plugin for RequestLoggerPlugin {
    fn name(&self) -> &str {
        "request-logger"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> eyre::Result<()> {
        if self.excluded(ctx.request.uri().path()) {
            return Ok(());
        }
        match ctx.phase {
            Phase::BeforeRequest => self.log_request(ctx),
            Phase::AfterResponse => self.log_response(ctx),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::Request;

    use super::*;
    use crate::core::plugin::context::test_support::context_for;

    fn plugin(config: serde_json::Value) -> Arc<dyn Plugin> {
        RequestLoggerPlugin::factory(&config).unwrap()
    }

    #[tokio::test]
    async fn stores_a_request_id_in_context() {
        let plugin = plugin(serde_json::json!({}));
        let mut ctx = context_for(
            Request::builder()
                .uri("/api/users")
                .body(Body::empty())
                .unwrap(),
        );

        plugin.execute(&mut ctx).await.unwrap();
        assert!(!ctx.get_str(REQUEST_ID_KEY).is_empty());
    }

    #[tokio::test]
    async fn excluded_paths_get_no_request_id() {
        let plugin = plugin(serde_json::json!({"excluded_paths": ["/health"]}));
        let mut ctx = context_for(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        );

        plugin.execute(&mut ctx).await.unwrap();
        assert!(ctx.get_str(REQUEST_ID_KEY).is_empty());
    }

    #[test]
    fn sensitive_headers_are_redacted() {
        let plugin = RequestLoggerPlugin {
            config: LoggerConfig {
                log_headers: true,
                ..LoggerConfig::default()
            },
        };

        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        headers.insert("x-api-key", "key123".parse().unwrap());
        headers.insert("accept", "application/json".parse().unwrap());

        let shown = plugin.redacted_headers(&headers);
        assert_eq!(shown["authorization"], "[REDACTED]");
        assert_eq!(shown["x-api-key"], "[REDACTED]");
        assert_eq!(shown["accept"], "application/json");
    }

    #[test]
    fn config_parses_with_defaults() {
        let config: LoggerConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!config.log_headers);
        assert!(config.log_query);
        assert!(config.excluded_paths.contains(&"/health".to_string()));
    }
}
