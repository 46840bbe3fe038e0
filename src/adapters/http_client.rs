//! Upstream HTTP client over a shared hyper connection pool.
//!
//! One pool for the whole process: idle connections are reused across
//! hosts, TLS is rustls with the platform trust store (1.2 minimum) and
//! HTTP/2 is negotiated opportunistically via ALPN. Redirects are never
//! followed — upstream 3xx responses pass through to the client verbatim.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::{
    config::models::TransportConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    default_read_timeout_ms: u64,
}

impl HttpClientAdapter {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(Duration::from_millis(config.dial_timeout_ms)));
        http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_secs)));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add a native certificate to the root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                errors = ?native_certs.errors,
                "some native certificates failed to load"
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build::<_, Body>(https_connector);

        tracing::info!(
            max_idle_per_host = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout_secs,
            dial_timeout_ms = config.dial_timeout_ms,
            "upstream connection pool configured"
        );

        Ok(Self {
            client,
            default_read_timeout_ms: config.default_read_timeout_ms,
        })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send(
        &self,
        req: Request<Body>,
        read_timeout_ms: u64,
    ) -> HttpClientResult<Response<Body>> {
        let read_timeout_ms = if read_timeout_ms == 0 {
            self.default_read_timeout_ms
        } else {
            read_timeout_ms
        };
        let deadline = Duration::from_millis(read_timeout_ms);

        let method = req.method().clone();
        let uri = req.uri().clone();

        let result = timeout(deadline, self.client.request(req)).await;
        match result {
            Err(_) => {
                tracing::warn!(%method, %uri, read_timeout_ms, "upstream response-header timeout");
                Err(HttpClientError::Timeout(read_timeout_ms))
            }
            Ok(Err(e)) => {
                tracing::error!(%method, %uri, error = %e, "upstream request failed");
                Err(HttpClientError::Connection(format!(
                    "{method} {uri} failed: {e}"
                )))
            }
            Ok(Ok(response)) => Ok(into_streaming(response)),
        }
    }
}

/// Re-wrap the hyper body without buffering; it keeps streaming past the
/// response-header deadline.
fn into_streaming(response: Response<Incoming>) -> Response<Body> {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_builds_with_default_transport() {
        assert!(HttpClientAdapter::new(&TransportConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn connection_refused_maps_to_connection_error() {
        let adapter = HttpClientAdapter::new(&TransportConfig::default()).unwrap();
        // Port 9 (discard) on localhost is almost certainly closed.
        let req = Request::builder()
            .uri("http://127.0.0.1:9/unreachable")
            .body(Body::empty())
            .unwrap();

        let result = adapter.send(req, 2_000).await;
        assert!(matches!(
            result,
            Err(HttpClientError::Connection(_)) | Err(HttpClientError::Timeout(_))
        ));
    }
}
