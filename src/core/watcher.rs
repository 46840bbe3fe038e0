//! Configuration watcher: the bridge from change notifications to reloads.
//!
//! One loop consumes the change stream and drives the reload coordinator,
//! which serializes reloads by construction — a second notification waits
//! in the channel until the current rebuild finishes. Cross-references
//! between entities make partial reloads fragile, so every accepted event
//! triggers a full rebuild of both plugins and routing state.
use std::sync::Arc;

use crate::{
    core::snapshot::ReloadCoordinator,
    ports::change_stream::{ChangeEvent, ChangeStream},
};

pub struct Watcher {
    stream: Arc<dyn ChangeStream>,
    coordinator: Arc<ReloadCoordinator>,
}

impl Watcher {
    pub fn new(stream: Arc<dyn ChangeStream>, coordinator: Arc<ReloadCoordinator>) -> Self {
        Self {
            stream,
            coordinator,
        }
    }

    /// Consume the change stream until it closes.
    ///
    /// Reload failures are logged and leave the previous snapshot current;
    /// the loop keeps going so a later notification can recover.
    pub async fn run(&self) -> eyre::Result<()> {
        let mut rx = self
            .stream
            .subscribe()
            .await
            .map_err(|e| eyre::eyre!("change stream subscription failed: {e}"))?;

        tracing::info!("configuration watcher started");

        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }

        tracing::info!("change stream closed, watcher stopping");
        Ok(())
    }

    async fn handle(&self, event: ChangeEvent) {
        match event.entity_type.as_str() {
            "service" | "route" | "plugin" => {
                tracing::info!(
                    entity_type = %event.entity_type,
                    entity_id = %event.entity_id,
                    action = %event.action,
                    "configuration change received, reloading"
                );

                match self.coordinator.reload().await {
                    Ok(stats) => {
                        tracing::info!(
                            routes = stats.routes,
                            services = stats.services,
                            plugins = stats.plugins,
                            "configuration reloaded"
                        );
                    }
                    Err(err) => {
                        tracing::error!(
                            error = %err,
                            entity_type = %event.entity_type,
                            entity_id = %event.entity_id,
                            "reload failed, keeping previous snapshot"
                        );
                    }
                }
            }
            other => {
                tracing::warn!(entity_type = other, "unknown entity type, ignoring");
            }
        }
    }
}
