//! Rate-limit plugin: the adapter between the chain and the limiter
//! primitives.
//!
//! Resolves a namespaced identifier for the caller, runs the configured
//! algorithm against the shared store, emits the standard `X-RateLimit-*`
//! headers and aborts with the configured status on denial. Store failures
//! are governed by the `critical` flag: fail-open (allow and log) by
//! default, abort 503 when critical.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{HeaderName, HeaderValue, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{
    core::{
        plugin::{Phase, Plugin, context::RequestContext},
        proxy,
        ratelimit::{
            LimitDecision, SlidingWindow, SlidingWindowConfig, TokenBucket, TokenBucketConfig,
            refill_rate,
        },
    },
    ports::ratelimit_store::{RateLimitStore, StoreError},
};

const CONSUMER_ID_KEY: &str = "consumer_id";
const API_KEY_HEADER: &str = "x-api-key";

fn default_algorithm() -> String {
    "token-bucket".into()
}
fn default_limit() -> i64 {
    1000
}
fn default_window() -> String {
    "1m".into()
}
fn default_identifier() -> String {
    "auto".into()
}
fn default_key_prefix() -> String {
    "rate_limit:".into()
}
fn default_headers() -> bool {
    true
}
fn default_response_code() -> u16 {
    429
}
fn default_response_message() -> String {
    "Rate limit exceeded".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub critical: bool,
    /// `token-bucket` (burst-friendly) or `sliding-window` (strict).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Humantime form: `1s`, `1m`, `1h`.
    #[serde(default = "default_window")]
    pub window: String,
    /// `auto` tries consumer, then api key, then ip.
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Emit `X-RateLimit-*` response headers.
    #[serde(default = "default_headers")]
    pub headers: bool,
    #[serde(default = "default_response_code")]
    pub response_code: u16,
    #[serde(default = "default_response_message")]
    pub response_message: String,
}

enum Limiter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
}

pub struct RateLimitPlugin {
    config: RateLimitConfig,
    limiter: Limiter,
    deny_status: StatusCode,
}

impl RateLimitPlugin {
    /// Build a factory bound to a shared store, registered under the
    /// `rate-limit` kind name.
    pub fn factory_with(
        store: Arc<dyn RateLimitStore>,
    ) -> impl Fn(&serde_json::Value) -> eyre::Result<Arc<dyn Plugin>> {
        move |config| Self::build(store.clone(), config).map(|p| p as Arc<dyn Plugin>)
    }

    fn build(
        store: Arc<dyn RateLimitStore>,
        config: &serde_json::Value,
    ) -> eyre::Result<Arc<RateLimitPlugin>> {
        let config: RateLimitConfig = serde_json::from_value(config.clone())
            .map_err(|e| eyre::eyre!("invalid rate-limit config: {e}"))?;

        if config.limit <= 0 {
            eyre::bail!("limit must be positive");
        }
        if !matches!(
            config.identifier.as_str(),
            "auto" | "consumer_id" | "api_key" | "ip"
        ) {
            eyre::bail!("invalid identifier '{}'", config.identifier);
        }
        if !(400..600).contains(&config.response_code) {
            eyre::bail!("response_code must be 4xx or 5xx");
        }
        let deny_status = StatusCode::from_u16(config.response_code)
            .map_err(|_| eyre::eyre!("invalid response_code {}", config.response_code))?;

        let window: Duration = humantime::parse_duration(&config.window)
            .map_err(|e| eyre::eyre!("invalid window '{}': {e}", config.window))?;
        if window.is_zero() {
            eyre::bail!("window must be positive");
        }

        let key_prefix = format!("{}{}:", config.key_prefix, config.algorithm);
        let limiter = match config.algorithm.as_str() {
            "token-bucket" => Limiter::TokenBucket(TokenBucket::new(
                store,
                TokenBucketConfig {
                    capacity: config.limit,
                    refill_rate: refill_rate(config.limit, window),
                    key_prefix,
                    ttl: window * 2,
                },
            )),
            "sliding-window" => Limiter::SlidingWindow(SlidingWindow::new(
                store,
                SlidingWindowConfig {
                    limit: config.limit,
                    window,
                    key_prefix,
                    ttl: window * 2,
                },
            )),
            other => eyre::bail!("unknown algorithm: {other}"),
        };

        tracing::info!(
            algorithm = %config.algorithm,
            limit = config.limit,
            window = %config.window,
            identifier = %config.identifier,
            "rate limit plugin initialized"
        );

        Ok(Arc::new(RateLimitPlugin {
            config,
            limiter,
            deny_status,
        }))
    }

    /// Resolve the namespaced identifier for this request.
    ///
    /// Pinned identifiers fall back to the auto chain when their source is
    /// absent; the chain is consumer > hashed api key > client ip.
    fn identifier(&self, ctx: &RequestContext) -> String {
        if self.config.identifier != "auto" {
            if let Some(id) = self.try_identifier(ctx, &self.config.identifier) {
                return id;
            }
        }

        self.try_identifier(ctx, "consumer_id")
            .or_else(|| self.try_identifier(ctx, "api_key"))
            .or_else(|| self.try_identifier(ctx, "ip"))
            .unwrap_or_else(|| "ip:unknown".into())
    }

    fn try_identifier(&self, ctx: &RequestContext, kind: &str) -> Option<String> {
        match kind {
            "consumer_id" => {
                let id = ctx.get_str(CONSUMER_ID_KEY);
                (!id.is_empty()).then(|| format!("consumer:{id}"))
            }
            "api_key" => ctx
                .request
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|key| format!("apikey:{}", hash_api_key(key))),
            "ip" => Some(format!(
                "ip:{}",
                proxy::extract_client_ip(ctx.request.headers(), ctx.client_addr)
            )),
            _ => None,
        }
    }

    fn emit_headers(&self, ctx: &mut RequestContext, decision: &LimitDecision) {
        let set = |ctx: &mut RequestContext, name: &'static str, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                ctx.response.set_header(HeaderName::from_static(name), value);
            }
        };
        set(ctx, "x-ratelimit-limit", self.config.limit.to_string());
        set(ctx, "x-ratelimit-remaining", decision.remaining.to_string());
        set(ctx, "x-ratelimit-reset", decision.reset_at.to_string());
    }

    /// Store failure policy: fail-open by default, deny with 503 when the
    /// plugin is marked critical.
    fn handle_store_error(&self, ctx: &mut RequestContext, err: StoreError) -> eyre::Result<()> {
        if self.config.critical {
            tracing::error!(
                error = %err,
                request_id = %ctx.request_id,
                "rate limit store failed, denying request (critical)"
            );
            ctx.abort(
                StatusCode::SERVICE_UNAVAILABLE,
                "Rate limiting service unavailable",
            );
            return Ok(());
        }

        tracing::warn!(
            error = %err,
            request_id = %ctx.request_id,
            "rate limit store unreachable, allowing request (fail-open)"
        );
        Ok(())
    }
}

/// SHA-256 digest, first 8 bytes as 16 hex chars. Raw keys never become
/// store keys.
fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn execute(&self, ctx: &mut RequestContext) -> eyre::Result<()> {
        if ctx.phase != Phase::BeforeRequest {
            return Ok(());
        }

        let identifier = self.identifier(ctx);
        let result = match &self.limiter {
            Limiter::TokenBucket(tb) => tb.allow(&identifier).await,
            Limiter::SlidingWindow(sw) => sw.allow(&identifier).await,
        };

        let decision = match result {
            Ok(d) => d,
            Err(err) => return self.handle_store_error(ctx, err),
        };

        if self.config.headers {
            self.emit_headers(ctx, &decision);
        }

        if !decision.allowed {
            tracing::warn!(
                identifier = %identifier,
                limit = self.config.limit,
                retry_after_secs = decision.retry_after.as_secs(),
                request_id = %ctx.request_id,
                "rate limit exceeded"
            );

            if !decision.retry_after.is_zero() {
                if let Ok(value) =
                    HeaderValue::from_str(&decision.retry_after.as_secs().max(1).to_string())
                {
                    ctx.response
                        .set_header(HeaderName::from_static("retry-after"), value);
                }
            }

            ctx.abort(self.deny_status, self.config.response_message.clone());
        }

        Ok(())
    }
}
