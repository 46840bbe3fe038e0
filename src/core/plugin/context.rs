//! Per-request state shared by every stage of the plugin chain.
//!
//! One context is created at dispatch and lives for exactly one request.
//! Plugins communicate through the string-keyed metadata map (entries are
//! `serde_json::Value`s with typed accessors that default on absence) and
//! terminate the chain through [`RequestContext::abort`].
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::Value;

use crate::core::{
    entities::{Route, Service},
    plugin::{Phase, writer::ResponseCapture},
    router::PathParams,
};

#[derive(Debug, Clone)]
struct AbortState {
    status: StatusCode,
    message: String,
}

/// Mutable request-scoped state handed to every plugin in the chain.
///
/// Never shared across requests. Cancellation follows the handler task:
/// when the client disconnects, axum drops the future and everything in
/// flight — including upstream calls holding this context — is cancelled.
pub struct RequestContext {
    /// The inbound request. BeforeRequest plugins may mutate headers; the
    /// proxy takes the body out when forwarding.
    pub request: Request<Body>,
    /// Staged response state (status, headers, optional body).
    pub response: ResponseCapture,
    pub route: Arc<Route>,
    pub service: Arc<Service>,
    pub phase: Phase,
    pub params: PathParams,
    pub client_addr: Option<SocketAddr>,
    /// Random per-request id, echoed upstream and on the response.
    pub request_id: String,
    started_at: Instant,
    metadata: HashMap<String, Value>,
    abort: Option<AbortState>,
}

impl RequestContext {
    pub fn new(
        request: Request<Body>,
        route: Arc<Route>,
        service: Arc<Service>,
        params: PathParams,
        client_addr: Option<SocketAddr>,
        request_id: String,
    ) -> Self {
        Self {
            request,
            response: ResponseCapture::new(),
            route,
            service,
            phase: Phase::BeforeRequest,
            params,
            client_addr,
            request_id,
            started_at: Instant::now(),
            metadata: HashMap::new(),
            abort: None,
        }
    }

    /// Store a metadata value for later plugins (and the other phase).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// String accessor; empty string when absent or not a string.
    pub fn get_str(&self, key: &str) -> &str {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Integer accessor; 0 when absent or not an integer.
    pub fn get_i64(&self, key: &str) -> i64 {
        self.metadata
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    /// Boolean accessor; false when absent or not a boolean.
    pub fn get_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }

    /// Stop the chain with the given status and message.
    ///
    /// The plugin may stage a body on the capture first; otherwise the
    /// dispatcher writes a minimal JSON error for it.
    pub fn abort(&mut self, status: StatusCode, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(
            status = status.as_u16(),
            message = %message,
            request_id = %self.request_id,
            "request aborted by plugin"
        );
        self.abort = Some(AbortState { status, message });
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    pub fn abort_status(&self) -> Option<StatusCode> {
        self.abort.as_ref().map(|a| a.status)
    }

    pub fn abort_message(&self) -> Option<&str> {
        self.abort.as_ref().map(|a| a.message.as_str())
    }

    /// Time since the request entered the dispatcher.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
