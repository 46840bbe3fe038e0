//! Signal-driven graceful shutdown.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Why the process is stopping.
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT.
    Graceful,
}

/// Fans a shutdown signal out to every task that cares.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    initiated: Arc<AtomicBool>,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_initiated(&self) -> bool {
        self.initiated.load(Ordering::Relaxed)
    }

    /// Trigger shutdown manually (tests, admin-driven restarts).
    pub fn trigger(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let _ = self.shutdown_tx.send(ShutdownReason::Graceful);
        }
    }

    /// Listen for SIGINT/SIGTERM and broadcast the first one received.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
        }
        self.trigger();
        Ok(())
    }

    /// Resolve when shutdown is triggered.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.subscribe();
        rx.recv().await.unwrap_or(ShutdownReason::Graceful)
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_waiters() {
        let shutdown = GracefulShutdown::new();
        let mut rx = shutdown.subscribe();

        assert!(!shutdown.is_initiated());
        shutdown.trigger();
        assert!(shutdown.is_initiated());
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_initiated());
    }
}
