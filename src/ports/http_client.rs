//! Port for the upstream HTTP client used by the proxy engine.
use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response};
use thiserror::Error;

/// Upstream transport failure, distinguished so the dispatcher can map
/// pre-first-byte failures to 502 and timeouts to useful logs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Dial, TLS or connection-level failure before any response byte.
    #[error("connection error: {0}")]
    Connection(String),

    /// The per-service response-header deadline elapsed.
    #[error("timeout after {0} ms waiting for upstream response")]
    Timeout(u64),

    /// The outgoing request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Interface for sending requests to backend services.
///
/// Implementations own a shared, warm connection pool and must be safe for
/// concurrent use from every request handler.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a request upstream, bounding the wait for response headers by
    /// `read_timeout_ms`. The response body streams; it is not buffered.
    async fn send(
        &self,
        req: Request<Body>,
        read_timeout_ms: u64,
    ) -> HttpClientResult<Response<Body>>;
}
