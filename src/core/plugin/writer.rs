//! Response capture with write-once status semantics.
//!
//! Plugins never touch the wire directly; they stage status, headers and
//! (optionally) a body here. The dispatcher materializes the staged state
//! into the client response exactly once — either from a plugin-written
//! body (aborts, preflights) or by merging staged headers onto a streamed
//! upstream response. After that commit point the capture is sealed:
//! further header or status writes have no wire effect and are logged,
//! never buffered to pretend otherwise.
use axum::body::Body;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

#[derive(Debug)]
pub struct ResponseCapture {
    status: StatusCode,
    status_written: bool,
    headers: HeaderMap,
    body: Vec<u8>,
    bytes_written: usize,
    committed: bool,
}

impl Default for ResponseCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            status_written: false,
            headers: HeaderMap::new(),
            body: Vec::new(),
            bytes_written: 0,
            committed: false,
        }
    }

    /// Record the response status. The first write wins; later calls are
    /// ignored and logged.
    pub fn write_status(&mut self, status: StatusCode) {
        if self.status_written {
            tracing::warn!(
                current = self.status.as_u16(),
                attempted = status.as_u16(),
                "status already written, ignoring"
            );
            return;
        }
        self.status = status;
        self.status_written = true;
    }

    /// Append body bytes, implicitly writing status 200 if none was set.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.committed {
            tracing::warn!(len = bytes.len(), "body write after commit, ignoring");
            return;
        }
        if !self.status_written {
            self.write_status(StatusCode::OK);
        }
        self.body.extend_from_slice(bytes);
        self.bytes_written += bytes.len();
    }

    /// Set a response header. No wire effect after commit.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.committed {
            tracing::warn!(header = %name, "header mutation after commit has no effect");
            return;
        }
        self.headers.insert(name, value);
    }

    /// Append a response header value (e.g. `Vary`). No wire effect after
    /// commit.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.committed {
            tracing::warn!(header = %name, "header mutation after commit has no effect");
            return;
        }
        self.headers.append(name, value);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_written(&self) -> bool {
        self.status_written
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Seal the capture around a streamed upstream response: record the
    /// status the client will see, drain the staged headers so the
    /// dispatcher can merge them, and note the byte count when the upstream
    /// declared one.
    pub fn commit_streamed(
        &mut self,
        status: StatusCode,
        content_length: Option<u64>,
    ) -> HeaderMap {
        self.status = status;
        self.status_written = true;
        self.committed = true;
        if let Some(len) = content_length {
            self.bytes_written = len as usize;
        }
        std::mem::take(&mut self.headers)
    }

    /// Seal the capture without consuming it, freezing headers and status
    /// so AfterResponse observers see final state.
    pub fn seal(&mut self) {
        self.committed = true;
        self.status_written = true;
    }

    /// Materialize a plugin-written response (abort or preflight) and seal
    /// the capture.
    pub fn into_response(mut self) -> Response<Body> {
        self.committed = true;
        let mut response = Response::builder()
            .status(self.status)
            .body(Body::from(self.body))
            .unwrap_or_else(|_| Response::new(Body::empty()));
        *response.headers_mut() = self.headers;
        response
    }
}
