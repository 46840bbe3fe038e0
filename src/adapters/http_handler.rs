//! The request dispatcher: operational endpoints, route matching, chain
//! execution and proxying, with every failure materialized as an HTTP
//! status plus a small JSON body.
use std::{net::SocketAddr, sync::Arc};

use axum::body::Body;
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, header};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        plugin::{Chain, Phase, context::RequestContext},
        proxy::ProxyEngine,
        snapshot::SnapshotHolder,
    },
    ports::{
        http_client::HttpClient, ratelimit_store::RateLimitStore,
        repository::ConfigRepository,
    },
    tracing_setup,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// One instance serves every connection; per-request state lives in the
/// [`RequestContext`].
pub struct HttpHandler {
    snapshot: SnapshotHolder,
    proxy: ProxyEngine,
    repo: Arc<dyn ConfigRepository>,
    ratelimit_store: Arc<dyn RateLimitStore>,
}

impl HttpHandler {
    pub fn new(
        snapshot: SnapshotHolder,
        client: Arc<dyn HttpClient>,
        repo: Arc<dyn ConfigRepository>,
        ratelimit_store: Arc<dyn RateLimitStore>,
    ) -> Self {
        Self {
            snapshot,
            proxy: ProxyEngine::new(client),
            repo,
            ratelimit_store,
        }
    }

    /// Entry point for every inbound request.
    pub async fn handle(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        match req.uri().path() {
            "/health" => return self.handle_health().await,
            "/ready" => return self.handle_ready().await,
            _ => {}
        }

        let request_id = Uuid::new_v4().to_string();
        let span = tracing_setup::request_span(
            req.method().as_str(),
            req.uri().path(),
            &request_id,
        );

        let mut response = self
            .dispatch(req, client_addr, &request_id)
            .instrument(span.clone())
            .await;

        span.record("http.status_code", response.status().as_u16());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }

    async fn dispatch(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        request_id: &str,
    ) -> Response<Body> {
        let Some(snapshot) = self.snapshot.load_full() else {
            tracing::warn!("no routing snapshot published yet");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "not ready",
                "Gateway has no routing configuration yet",
            );
        };

        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| req.uri().host().map(String::from));

        let matched = match snapshot
            .matcher
            .matches(req.method(), req.uri().path(), host.as_deref())
        {
            Ok(m) => m,
            Err(err) => {
                tracing::debug!(error = %err, "no route matched");
                return error_response(
                    StatusCode::NOT_FOUND,
                    "not found",
                    "No route configured for this path",
                );
            }
        };

        tracing::Span::current().record("route.id", matched.route.id.as_str());
        tracing::Span::current().record("service.id", matched.service.id.as_str());

        let mut ctx = RequestContext::new(
            req,
            matched.route,
            matched.service,
            matched.params,
            client_addr,
            request_id.to_string(),
        );
        let chain = Chain::build(&snapshot.plugins, &ctx.route, &ctx.service);

        // BeforeRequest phase. A critical failure fails the request
        // immediately; observers do not run.
        ctx.phase = Phase::BeforeRequest;
        if let Err(err) = chain.execute(&mut ctx).await {
            tracing::error!(
                plugin = %err.plugin,
                phase = %err.phase,
                error = %err.source,
                "critical plugin failure"
            );
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
                "A required processing stage failed",
            );
        }

        if ctx.is_aborted() {
            return self.finish_aborted(ctx, &chain).await;
        }

        self.forward_and_finish(ctx, &chain).await
    }

    /// Materialize an abort staged by a BeforeRequest plugin, then let
    /// AfterResponse observers see the sealed outcome.
    async fn finish_aborted(&self, mut ctx: RequestContext, chain: &Chain) -> Response<Body> {
        let status = ctx.abort_status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // The aborting plugin may have written its own response (a CORS
        // preflight writes 204); otherwise stage a minimal JSON error.
        if !ctx.response.status_written() {
            let message = ctx.abort_message().unwrap_or("Request rejected").to_string();
            ctx.response.set_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            ctx.response.write_status(status);
            let body = serde_json::json!({
                "error": status.canonical_reason().unwrap_or("rejected"),
                "message": message,
            });
            ctx.response.write(body.to_string().as_bytes());
        }
        ctx.response.seal();

        ctx.phase = Phase::AfterResponse;
        if let Err(err) = chain.execute(&mut ctx).await {
            // The response is already sealed; nothing to change on the wire.
            tracing::error!(
                plugin = %err.plugin,
                error = %err.source,
                "critical plugin failure after abort"
            );
        }

        std::mem::take(&mut ctx.response).into_response()
    }

    /// Forward upstream, merge staged headers, and run observers against
    /// the committed response.
    async fn forward_and_finish(&self, mut ctx: RequestContext, chain: &Chain) -> Response<Body> {
        // Take the body out; method, URI and headers stay on the context
        // for AfterResponse observers.
        let body = std::mem::replace(ctx.request.body_mut(), Body::empty());
        let mut upstream_req = Request::new(body);
        *upstream_req.method_mut() = ctx.request.method().clone();
        *upstream_req.uri_mut() = ctx.request.uri().clone();
        *upstream_req.headers_mut() = ctx.request.headers().clone();

        let request_id = ctx.request_id.clone();
        let forwarded = self
            .proxy
            .forward(
                &ctx.route,
                &ctx.service,
                upstream_req,
                ctx.client_addr,
                &request_id,
            )
            .await;

        let mut response = match forwarded {
            Ok(outcome) => outcome.response,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    service_id = %ctx.service.id,
                    request_id = %request_id,
                    "upstream request failed before first byte"
                );
                error_response(
                    StatusCode::BAD_GATEWAY,
                    "bad gateway",
                    "Failed to reach the backend service",
                )
            }
        };

        // Headers staged during BeforeRequest (rate-limit counters, CORS
        // context) commit onto the wire response now; later mutations have
        // no effect.
        let content_length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let staged = ctx.response.commit_streamed(response.status(), content_length);
        for (name, value) in staged.iter() {
            response.headers_mut().append(name.clone(), value.clone());
        }

        ctx.phase = Phase::AfterResponse;
        if let Err(err) = chain.execute(&mut ctx).await {
            // Committed response: the failure is observable only in logs.
            tracing::error!(
                plugin = %err.plugin,
                error = %err.source,
                "critical plugin failure after response commit"
            );
        }

        response
    }

    /// `GET /health`: store reachability and pool statistics.
    async fn handle_health(&self) -> Response<Body> {
        let database_ok = self.repo.ping().await.is_ok();
        let ratelimit_ok = self.ratelimit_store.ping().await.is_ok();
        let healthy = database_ok && ratelimit_ok;

        let pool = self
            .repo
            .pool_stats()
            .map(|(total, idle)| serde_json::json!({"total": total, "idle": idle}));
        let snapshot = self.snapshot.load_full().map(|s| s.stats());

        let body = serde_json::json!({
            "status": (if healthy { "healthy" } else { "unhealthy" }),
            "stores": {
                "database": (if database_ok { "ok" } else { "unreachable" }),
                "ratelimit": (if ratelimit_ok { "ok" } else { "unreachable" }),
            },
            "pool": pool,
            "snapshot": snapshot,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let status = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        json_response(status, body)
    }

    /// `GET /ready`: snapshot published and stores answering.
    async fn handle_ready(&self) -> Response<Body> {
        if self.snapshot.load().is_none() {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"status": "not ready", "reason": "no snapshot published"}),
            );
        }

        if self.repo.ping().await.is_err() {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"status": "not ready", "reason": "configuration store unreachable"}),
            );
        }

        if self.ratelimit_store.ping().await.is_err() {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({"status": "not ready", "reason": "rate-limit store unreachable"}),
            );
        }

        json_response(StatusCode::OK, serde_json::json!({"status": "ready"}))
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response<Body> {
    json_response(
        status,
        serde_json::json!({"error": error, "message": message}),
    )
}
