//! Plugin factory registration and instance loading.
//!
//! Factories turn an opaque JSON config document into a ready plugin
//! instance; construction may fail with a validation error, which is fatal
//! to that plugin but never to the load as a whole. The control plane uses
//! [`Registry::validate_config`] to dry-run a document before storing it.
use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{
    core::{
        entities::{PluginConfig, PluginScope},
        plugin::{Plugin, PluginInstance},
    },
    ports::repository::{ConfigRepository, RepositoryResult},
};

/// Builds a plugin from its stored config document.
pub type PluginFactory =
    Arc<dyn Fn(&Value) -> eyre::Result<Arc<dyn Plugin>> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, PluginFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a plugin kind name.
    ///
    /// Registering the same name twice overwrites the previous factory and
    /// logs a warning.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Value) -> eyre::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_string(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(plugin = name, "plugin factory already registered, overwriting");
        } else {
            tracing::debug!(plugin = name, "plugin factory registered");
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn registered(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Load enabled plugin configurations from the store and build
    /// instances.
    ///
    /// Configurations with a missing factory, a failing constructor or an
    /// inconsistent scope reference are skipped with a recorded error; the
    /// load itself only fails when the store does.
    pub async fn load_from_store(
        &self,
        repo: &dyn ConfigRepository,
    ) -> RepositoryResult<Vec<PluginInstance>> {
        let configs = repo.get_plugins(true).await?;
        if configs.is_empty() {
            tracing::info!("no enabled plugins in store");
            return Ok(Vec::new());
        }

        let total = configs.len();
        let mut instances = Vec::with_capacity(total);
        for config in configs {
            match self.build_instance(config) {
                Ok(instance) => {
                    tracing::info!(
                        plugin = instance.plugin.name(),
                        scope = %instance.scope,
                        priority = instance.priority,
                        critical = instance.critical,
                        "plugin instance created"
                    );
                    instances.push(instance);
                }
                Err((id, name, err)) => {
                    tracing::error!(
                        plugin = %name,
                        plugin_id = %id,
                        error = %err,
                        "failed to build plugin instance, skipping"
                    );
                }
            }
        }

        tracing::info!(
            total,
            loaded = instances.len(),
            skipped = total - instances.len(),
            "plugin loading completed"
        );

        Ok(instances)
    }

    /// Dry-run a factory against a config document without installing
    /// anything.
    pub fn validate_config(&self, name: &str, config: &Value) -> eyre::Result<()> {
        let factory = self.factories.get(name).ok_or_else(|| {
            eyre::eyre!(
                "unknown plugin '{name}' (registered: {:?})",
                self.registered()
            )
        })?;
        factory(config).map(|_| ())
    }

    fn build_instance(
        &self,
        config: PluginConfig,
    ) -> Result<PluginInstance, (String, String, eyre::Report)> {
        let fail = |err: eyre::Report| (config.id.clone(), config.name.clone(), err);

        let factory = match self.factories.get(&config.name) {
            Some(f) => f,
            None => {
                return Err(fail(eyre::eyre!(
                    "no factory registered (available: {:?})",
                    self.registered()
                )));
            }
        };

        if let Err(err) = validate_scope_reference(&config) {
            return Err(fail(err));
        }

        let plugin = match factory(&config.config) {
            Ok(p) => p,
            Err(err) => return Err(fail(err.wrap_err("factory failed to build plugin"))),
        };

        if plugin.name() != config.name {
            tracing::warn!(
                expected = %config.name,
                actual = plugin.name(),
                "plugin name mismatch"
            );
        }

        let critical = parse_critical_flag(&config.config);
        Ok(PluginInstance {
            plugin,
            scope: config.scope,
            priority: config.priority,
            critical,
            config: Arc::new(config),
        })
    }
}

/// Loaded-instance counts broken down by scope, reported on the health
/// surface alongside the snapshot totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScopeCounts {
    pub global: usize,
    pub service: usize,
    pub route: usize,
    pub consumer: usize,
}

/// Break a built instance list down by scope.
pub fn scope_counts(instances: &[PluginInstance]) -> ScopeCounts {
    let mut counts = ScopeCounts::default();
    for instance in instances {
        match instance.scope {
            PluginScope::Global => counts.global += 1,
            PluginScope::Service => counts.service += 1,
            PluginScope::Route => counts.route += 1,
            PluginScope::Consumer => counts.consumer += 1,
        }
    }
    counts
}

/// Scope-to-reference consistency, enforced at load time.
fn validate_scope_reference(config: &PluginConfig) -> eyre::Result<()> {
    match config.scope {
        PluginScope::Global => Ok(()),
        PluginScope::Service if config.service_id.is_none() => {
            Err(eyre::eyre!("service-scoped plugin must have a service_id"))
        }
        PluginScope::Route if config.route_id.is_none() => {
            Err(eyre::eyre!("route-scoped plugin must have a route_id"))
        }
        PluginScope::Consumer if config.consumer_id.is_none() => {
            Err(eyre::eyre!("consumer-scoped plugin must have a consumer_id"))
        }
        _ => Ok(()),
    }
}

/// The `critical` flag lives in the opaque config document. Parsing is
/// deliberately forgiving: a missing or mistyped field means non-critical.
fn parse_critical_flag(config: &Value) -> bool {
    config
        .get("critical")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
