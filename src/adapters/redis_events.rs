//! Redis pub/sub change feed.
//!
//! Subscribes to the control plane's notification channel and forwards
//! parsed events into an mpsc channel for the watcher loop. Malformed
//! payloads are logged and dropped; they must never wedge the feed.
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::ports::change_stream::{ChangeEvent, ChangeStream, ChangeStreamError};

pub struct RedisChangeStream {
    client: redis::Client,
    channel: String,
}

impl RedisChangeStream {
    pub fn new(url: &str, channel: impl Into<String>) -> eyre::Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| eyre::eyre!("invalid redis url: {e}"))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl ChangeStream for RedisChangeStream {
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, ChangeStreamError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| ChangeStreamError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| ChangeStreamError::Subscribe(e.to_string()))?;

        tracing::info!(channel = %self.channel, "subscribed to change notifications");

        let (tx, rx) = mpsc::channel(16);
        let channel = self.channel.clone();

        tokio::spawn(async move {
            let mut pubsub = pubsub;
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "unreadable pub/sub payload");
                        continue;
                    }
                };

                match serde_json::from_str::<ChangeEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            // Watcher gone; stop forwarding.
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            payload = %payload,
                            "malformed change event, dropping"
                        );
                    }
                }
            }
            tracing::info!(channel = %channel, "pub/sub message stream ended");
        });

        Ok(rx)
    }
}
