//! The plugin system: phases, per-request context, chain execution and the
//! factory registry.
//!
//! A plugin is a named unit of request processing that runs twice per
//! request, once in each phase:
//!
//! ```text
//! request in
//!     │
//!     ▼
//! BeforeRequest   (ascending priority; may mutate the request or abort)
//!     │
//!     ▼
//! proxy to upstream
//!     │
//!     ▼
//! AfterResponse   (descending priority; observes the committed response)
//!     │
//!     ▼
//! response out
//! ```
//!
//! Instances are shared across requests and re-entered concurrently from
//! many handler tasks; any per-request state must live in the
//! [`RequestContext`](context::RequestContext).
pub mod builtin;
pub mod chain;
pub mod context;
pub mod registry;
pub mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::entities::{PluginConfig, PluginScope};

pub use chain::Chain;
pub use context::RequestContext;
pub use registry::Registry;
pub use writer::ResponseCapture;

/// The point in the request life cycle at which a plugin executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Precedes forwarding: authentication, rate limiting, request
    /// mutation, aborts.
    BeforeRequest,
    /// Runs after the response has been committed: observability and
    /// non-mutating post-processing.
    AfterResponse,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeRequest => "before_request",
            Phase::AfterResponse => "after_response",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A processing stage. Implementations inspect `ctx.phase` and act in the
/// phases they care about.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable identifier matching the plugin kind name in the store.
    fn name(&self) -> &str;

    /// Run the plugin against the request context.
    ///
    /// Returning an error does not abort the request unless the instance is
    /// marked critical; deliberate denials go through
    /// [`RequestContext::abort`] instead.
    async fn execute(&self, ctx: &mut context::RequestContext) -> eyre::Result<()>;
}

/// A plugin execution failure carrying enough context to correlate logs.
#[derive(Debug, Error)]
#[error("plugin '{plugin}' failed in {phase} phase: {source}")]
pub struct PluginError {
    pub plugin: String,
    pub phase: Phase,
    /// Critical failures stop the chain and fail the request with 500.
    pub critical: bool,
    #[source]
    pub source: eyre::Report,
}

/// A constructed plugin bound to its stored configuration.
#[derive(Clone)]
pub struct PluginInstance {
    pub plugin: Arc<dyn Plugin>,
    pub config: Arc<PluginConfig>,
    pub scope: PluginScope,
    pub priority: i32,
    pub critical: bool,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin", &self.plugin.name())
            .field("scope", &self.scope)
            .field("priority", &self.priority)
            .field("critical", &self.critical)
            .finish()
    }
}
