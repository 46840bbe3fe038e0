//! Reverse-proxy forwarding engine.
//!
//! Builds the upstream URL from the matched service and route, rewrites
//! headers with hop-by-hop hygiene and gateway attribution, sends the
//! request over the shared pooled client and hands back the streaming
//! response with `X-Upstream-Latency` attached. Nothing here buffers a
//! body in either direction.
use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::body::Body;
use http::{
    HeaderMap, HeaderName, HeaderValue, Request, Response, Uri, header,
};

use crate::{
    core::entities::{Route, Service},
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// Headers valid for a single transport hop only, never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct ProxyEngine {
    client: Arc<dyn HttpClient>,
}

/// Result of a forward: the streaming upstream response plus timing.
pub struct ForwardOutcome {
    pub response: Response<Body>,
    pub upstream_latency_ms: u64,
}

impl ProxyEngine {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Forward `parts`+`body` of the inbound request to the route's
    /// service.
    ///
    /// On success the response carries `X-Upstream-Latency`; hop-by-hop
    /// headers have been stripped from both directions. Failures are
    /// transport-level only — upstream HTTP error statuses pass through
    /// untouched, and redirects are never followed.
    pub async fn forward(
        &self,
        route: &Route,
        service: &Service,
        inbound: Request<Body>,
        client_addr: Option<SocketAddr>,
        request_id: &str,
    ) -> HttpClientResult<ForwardOutcome> {
        let (parts, body) = inbound.into_parts();

        let upstream_uri = build_upstream_uri(service, route, &parts.uri)
            .map_err(HttpClientError::InvalidRequest)?;

        tracing::debug!(
            request_id,
            upstream_uri = %upstream_uri,
            service_id = %service.id,
            "forwarding request upstream"
        );

        let mut upstream_req = Request::builder()
            .method(parts.method.clone())
            .uri(upstream_uri)
            .body(body)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        copy_headers(upstream_req.headers_mut(), &parts.headers);
        set_forwarding_headers(
            upstream_req.headers_mut(),
            &parts.headers,
            client_addr,
            request_id,
            parts.uri.scheme_str().unwrap_or("http"),
            inbound_host(&parts.headers, &parts.uri),
        );

        if route.preserve_host {
            if let Some(host) = inbound_host(&parts.headers, &parts.uri) {
                if let Ok(value) = HeaderValue::from_str(&host) {
                    upstream_req.headers_mut().insert(header::HOST, value);
                }
            }
        } else if let Ok(value) = HeaderValue::from_str(&service.authority()) {
            upstream_req.headers_mut().insert(header::HOST, value);
        }

        let started = Instant::now();
        let response = self
            .client
            .send(upstream_req, service.read_timeout_ms.max(0) as u64)
            .await?;
        let upstream_latency_ms = started.elapsed().as_millis() as u64;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        if let Ok(value) = HeaderValue::from_str(&upstream_latency_ms.to_string()) {
            parts
                .headers
                .insert(HeaderName::from_static("x-upstream-latency"), value);
        }

        tracing::debug!(
            request_id,
            status = parts.status.as_u16(),
            upstream_latency_ms,
            "upstream responded"
        );

        Ok(ForwardOutcome {
            response: Response::from_parts(parts, body),
            upstream_latency_ms,
        })
    }
}

/// Compute the full upstream URI: authority from the service, the
/// (possibly stripped) inbound path appended to the service base path, and
/// the original query string.
fn build_upstream_uri(
    service: &Service,
    route: &Route,
    inbound: &Uri,
) -> Result<Uri, String> {
    let mut path = inbound.path().to_string();

    if route.strip_path {
        path = strip_route_prefix(&path, &route.paths);
    }
    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    let base = service
        .path
        .as_deref()
        .map(|p| p.trim_end_matches('/'))
        .unwrap_or_default();

    let mut uri = format!(
        "{}://{}{}{}",
        service.protocol,
        service.authority(),
        base,
        path
    );
    if let Some(query) = inbound.query() {
        uri.push('?');
        uri.push_str(query);
    }

    uri.parse::<Uri>().map_err(|e| format!("invalid upstream uri {uri}: {e}"))
}

/// Trim the first matching pattern's literal prefix, in declaration order.
///
/// A pattern's literal prefix is its segments up to (excluding) the first
/// `:param` or `*`; `/api/:id` strips `/api`, plain `/api` strips itself.
fn strip_route_prefix(path: &str, patterns: &[String]) -> String {
    for pattern in patterns {
        let prefix = literal_prefix(pattern);
        if prefix.is_empty() || prefix == "/" {
            continue;
        }
        if let Some(rest) = path.strip_prefix(&prefix) {
            // Segment boundary only: /api must not strip from /apiary.
            if rest.is_empty() || rest.starts_with('/') {
                return rest.to_string();
            }
        }
    }
    path.to_string()
}

fn literal_prefix(pattern: &str) -> String {
    let mut literal = Vec::new();
    for segment in pattern.trim_matches('/').split('/') {
        if segment.starts_with(':') || segment == "*" || segment.is_empty() {
            break;
        }
        literal.push(segment);
    }
    if literal.is_empty() {
        String::new()
    } else {
        format!("/{}", literal.join("/"))
    }
}

/// Copy inbound headers onto the upstream request, dropping hop-by-hop
/// headers and `Host` (set explicitly afterwards).
fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        if is_hop_by_hop(name) || name == header::HOST {
            continue;
        }
        dst.append(name.clone(), value.clone());
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Gateway attribution headers on the upstream request.
///
/// The value appended to `X-Forwarded-For` is the direct peer address;
/// `X-Real-IP` carries the extracted client IP, which prefers any
/// forwarding chain already present.
fn set_forwarding_headers(
    headers: &mut HeaderMap,
    inbound: &HeaderMap,
    client_addr: Option<SocketAddr>,
    request_id: &str,
    scheme: &str,
    host: Option<String>,
) {
    let peer_ip = client_addr.map(|a| a.ip().to_string());

    if let Some(peer) = &peer_ip {
        let xff = match inbound.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.is_empty() => format!("{prior}, {peer}"),
            _ => peer.clone(),
        };
        if let Ok(value) = HeaderValue::from_str(&xff) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }

    let proto = if scheme == "https" { "https" } else { "http" };
    headers.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static(proto),
    );

    if let Some(host) = host {
        if let Ok(value) = HeaderValue::from_str(&host) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), value);
        }
    }

    let client_ip = extract_client_ip(inbound, client_addr);
    if !client_ip.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&client_ip) {
            headers.insert(HeaderName::from_static("x-real-ip"), value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }
}

/// Client IP extraction order: `X-Forwarded-For` first element, then
/// `X-Real-IP`, then the peer address with any port stripped.
pub fn extract_client_ip(headers: &HeaderMap, client_addr: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    client_addr.map(|a| a.ip().to_string()).unwrap_or_default()
}

fn inbound_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| uri.host().map(String::from))
}
