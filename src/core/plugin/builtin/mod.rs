//! Built-in plugins shipped with the gateway.
//!
//! These are production functionality and, equally, the reference examples
//! for writing custom plugins against the [`Plugin`](super::Plugin) trait.
pub mod cors;
pub mod logger;
pub mod rate_limit;

use std::sync::Arc;

pub use cors::CorsPlugin;
pub use logger::RequestLoggerPlugin;
pub use rate_limit::RateLimitPlugin;

use crate::{core::plugin::registry::Registry, ports::ratelimit_store::RateLimitStore};

/// Register every built-in factory. The rate-limit factory captures the
/// shared store.
pub fn register_builtins(registry: &mut Registry, ratelimit_store: Arc<dyn RateLimitStore>) {
    registry.register("cors", CorsPlugin::factory);
    registry.register("request-logger", RequestLoggerPlugin::factory);
    registry.register("rate-limit", RateLimitPlugin::factory_with(ratelimit_store));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;

    #[test]
    fn registers_all_builtins() {
        let mut registry = Registry::new();
        register_builtins(&mut registry, Arc::new(MemoryStore::new()));

        for name in ["cors", "request-logger", "rate-limit"] {
            assert!(registry.is_registered(name), "{name} missing");
        }
    }
}
