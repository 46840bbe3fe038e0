//! Cross-Origin Resource Sharing plugin.
//!
//! Adds CORS response headers for allowed origins and answers preflight
//! OPTIONS requests directly from the BeforeRequest phase (204, chain
//! aborted, nothing forwarded). A disallowed origin is not an error: the
//! plugin simply emits no CORS headers and lets the browser enforce the
//! block.
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, Method, StatusCode, header};
use serde::Deserialize;

use crate::core::plugin::{Phase, Plugin, context::RequestContext};

const ORIGIN_ALLOWED_KEY: &str = "cors_origin_allowed";
const ORIGIN_KEY: &str = "cors_origin";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub critical: bool,
    /// Allowed origins; `*` admits everything, `*.suffix` admits the
    /// suffix and its subdomains.
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Response headers readable by browser JavaScript.
    pub exposed_headers: Vec<String>,
    /// Incompatible with a wildcard origin; rejected at construction.
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            critical: false,
            allowed_origins: vec!["*".into()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Content-Type", "Authorization", "X-Requested-With", "Accept"]
                .map(String::from)
                .to_vec(),
            exposed_headers: vec!["X-Request-ID".into()],
            allow_credentials: false,
            max_age: 86_400,
        }
    }
}

pub struct CorsPlugin {
    config: CorsConfig,
}

impl CorsPlugin {
    /// Factory registered under the `cors` kind name.
    pub fn factory(config: &serde_json::Value) -> eyre::Result<Arc<dyn Plugin>> {
        let config: CorsConfig = serde_json::from_value(config.clone())
            .map_err(|e| eyre::eyre!("invalid cors config: {e}"))?;

        if config.allow_credentials && config.allowed_origins.iter().any(|o| o == "*") {
            eyre::bail!("allow_credentials cannot be true when allowed_origins contains '*'");
        }

        Ok(Arc::new(CorsPlugin { config }))
    }

    fn has_wildcard_origin(&self) -> bool {
        self.config.allowed_origins.iter().any(|o| o == "*")
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        if self.has_wildcard_origin() {
            return true;
        }
        self.config.allowed_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            if let Some(suffix) = allowed.strip_prefix("*.") {
                return origin == suffix || origin.ends_with(&format!(".{suffix}"));
            }
            false
        })
    }

    fn emit_cors_headers(&self, ctx: &mut RequestContext, origin: &str) {
        let allow_origin = if self.has_wildcard_origin() {
            "*"
        } else {
            origin
        };
        if let Ok(value) = HeaderValue::from_str(allow_origin) {
            ctx.response
                .set_header(HeaderName::from_static("access-control-allow-origin"), value);
        }

        set_joined(
            ctx,
            "access-control-allow-methods",
            &self.config.allowed_methods,
        );
        set_joined(
            ctx,
            "access-control-allow-headers",
            &self.config.allowed_headers,
        );
        set_joined(
            ctx,
            "access-control-expose-headers",
            &self.config.exposed_headers,
        );

        if self.config.allow_credentials {
            ctx.response.set_header(
                HeaderName::from_static("access-control-allow-credentials"),
                HeaderValue::from_static("true"),
            );
        }

        ctx.response
            .append_header(header::VARY, HeaderValue::from_static("Origin"));
    }

    fn handle_before(&self, ctx: &mut RequestContext) {
        let origin = match ctx
            .request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        {
            // No Origin header: not a CORS request.
            None => return,
            Some(o) => o.to_string(),
        };

        if !self.origin_allowed(&origin) {
            tracing::debug!(origin = %origin, "origin not allowed, emitting no CORS headers");
            return;
        }

        ctx.set(ORIGIN_ALLOWED_KEY, true);
        ctx.set(ORIGIN_KEY, origin.clone());

        let is_preflight = ctx.request.method() == Method::OPTIONS
            && ctx
                .request
                .headers()
                .contains_key("access-control-request-method");

        if is_preflight {
            self.emit_cors_headers(ctx, &origin);
            if let Ok(value) = HeaderValue::from_str(&self.config.max_age.to_string()) {
                ctx.response
                    .set_header(HeaderName::from_static("access-control-max-age"), value);
            }
            ctx.response.write_status(StatusCode::NO_CONTENT);
            ctx.abort(StatusCode::NO_CONTENT, "CORS preflight");
        }
    }

    fn handle_after(&self, ctx: &mut RequestContext) {
        if !ctx.get_bool(ORIGIN_ALLOWED_KEY) {
            return;
        }
        let origin = ctx.get_str(ORIGIN_KEY).to_string();
        self.emit_cors_headers(ctx, &origin);
    }
}

fn set_joined(ctx: &mut RequestContext, name: &'static str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&values.join(", ")) {
        ctx.response.set_header(HeaderName::from_static(name), value);
    }
}

#[async_trait]
impl Plugin for CorsPlugin {
    fn name(&self) -> &str {
        "cors"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> eyre::Result<()> {
        match ctx.phase {
            Phase::BeforeRequest => self.handle_before(ctx),
            Phase::AfterResponse => self.handle_after(ctx),
        }
        Ok(())
    }
}
