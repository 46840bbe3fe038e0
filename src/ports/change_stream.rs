//! Port for the configuration change-notification feed.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// A change announcement published by the control plane.
///
/// `entity_type` is one of `service`, `route`, `plugin`; anything else is
/// logged and skipped. The publisher is trusted — the gateway does not
/// authenticate the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum ChangeStreamError {
    #[error("subscription failed: {0}")]
    Subscribe(String),
}

/// A pub/sub subscription delivering [`ChangeEvent`]s.
///
/// `subscribe` may be called once; the receiver is handed to the watcher
/// loop, which serializes reloads.
#[async_trait]
pub trait ChangeStream: Send + Sync + 'static {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, ChangeStreamError>;
}
