//! Sliding-window limiter: exact request counting over a moving window.
//!
//! Each identifier owns a score-ordered set of per-request tokens scored
//! by Unix seconds. Every call expires members older than the window,
//! counts the remainder and inserts a new member when under the limit —
//! one atomic step in the store. Stricter than the token bucket: no burst
//! beyond the configured limit is ever admitted.
use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::ports::ratelimit_store::{RateLimitStore, StoreResult, WindowState};

use super::LimitDecision;

#[derive(Debug, Clone)]
pub struct SlidingWindowConfig {
    /// Maximum requests per window.
    pub limit: i64,
    pub window: Duration,
    /// Prepended to the identifier to form the store key.
    pub key_prefix: String,
    /// Store-state freshness; recommended 2x the window.
    pub ttl: Duration,
}

pub struct SlidingWindow {
    store: Arc<dyn RateLimitStore>,
    config: SlidingWindowConfig,
}

impl SlidingWindow {
    pub fn new(store: Arc<dyn RateLimitStore>, config: SlidingWindowConfig) -> Self {
        tracing::debug!(
            limit = config.limit,
            window_secs = config.window.as_secs(),
            key_prefix = %config.key_prefix,
            "sliding window limiter initialized"
        );
        Self { store, config }
    }

    /// Check the limit for `identifier`, recording the request when
    /// allowed.
    pub async fn allow(&self, identifier: &str) -> StoreResult<LimitDecision> {
        let key = format!("{}{}", self.config.key_prefix, identifier);
        let now = Utc::now();
        let now_secs = now.timestamp();
        let window_secs = self.config.window.as_secs() as i64;
        let window_start = now_secs - window_secs;

        // Monotone per-request member so equal-second requests stay
        // distinct in the set.
        let member = format!("{}", now.timestamp_nanos_opt().unwrap_or_default());

        let reply = self
            .store
            .sliding_window(
                &key,
                window_start,
                now_secs,
                self.config.limit,
                &member,
                self.config.ttl.as_secs() as i64,
            )
            .await?;

        let reset_at = if reply.oldest > 0 {
            reply.oldest + window_secs
        } else {
            now_secs + window_secs
        };

        let retry_after = if reply.allowed {
            Duration::ZERO
        } else {
            Duration::from_secs((reset_at - now_secs).max(0) as u64)
        };

        Ok(LimitDecision {
            allowed: reply.allowed,
            remaining: (self.config.limit - reply.count).max(0),
            reset_at,
            retry_after,
        })
    }

    /// Count the requests currently in the window for `identifier` and
    /// report the oldest timestamp, without recording anything.
    pub async fn state(&self, identifier: &str) -> StoreResult<WindowState> {
        let key = format!("{}{}", self.config.key_prefix, identifier);
        let window_start = Utc::now().timestamp() - self.config.window.as_secs() as i64;
        self.store.window_state(&key, window_start).await
    }

    /// Clear the window for `identifier`.
    pub async fn reset(&self, identifier: &str) -> StoreResult<()> {
        let key = format!("{}{}", self.config.key_prefix, identifier);
        self.store.remove(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::MemoryStore;

    fn window(limit: i64, window: Duration) -> SlidingWindow {
        SlidingWindow::new(
            Arc::new(MemoryStore::new()),
            SlidingWindowConfig {
                limit,
                window,
                key_prefix: "rate_limit:sliding-window:".into(),
                ttl: window * 2,
            },
        )
    }

    #[tokio::test]
    async fn first_limit_calls_allowed_then_denied() {
        let limiter = window(5, Duration::from_secs(10));

        for i in 0..5 {
            let d = limiter.allow("consumer:alice").await.unwrap();
            assert!(d.allowed, "call {i} should be allowed");
            assert_eq!(d.remaining, 5 - (i as i64) - 1);
        }

        let denied = limiter.allow("consumer:alice").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn window_slides_open_again() {
        let limiter = window(2, Duration::from_secs(1));
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(!limiter.allow("k").await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.allow("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn denial_does_not_consume_a_slot() {
        let limiter = window(1, Duration::from_secs(5));
        assert!(limiter.allow("k").await.unwrap().allowed);

        // Repeated denials must not extend the window occupancy.
        for _ in 0..3 {
            let d = limiter.allow("k").await.unwrap();
            assert!(!d.allowed);
            assert_eq!(d.remaining, 0);
        }
    }

    #[tokio::test]
    async fn concurrent_calls_admit_exactly_limit() {
        let limiter = Arc::new(window(3, Duration::from_secs(30)));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.allow("shared").await.unwrap().allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn state_counts_without_recording() {
        let limiter = window(3, Duration::from_secs(10));
        assert_eq!(limiter.state("k").await.unwrap().count, 0);

        limiter.allow("k").await.unwrap();
        limiter.allow("k").await.unwrap();

        let state = limiter.state("k").await.unwrap();
        assert_eq!(state.count, 2);
        assert!(state.oldest > 0);

        // Inspection does not occupy a slot: one more allow fits.
        assert_eq!(limiter.state("k").await.unwrap().count, 2);
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(!limiter.allow("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn reset_time_tracks_oldest_member() {
        let limiter = window(1, Duration::from_secs(10));
        let first = limiter.allow("k").await.unwrap();
        let denied = limiter.allow("k").await.unwrap();
        assert!(!denied.allowed);
        // Oldest member is the first call, so both share a reset time.
        assert_eq!(first.reset_at, denied.reset_at);
    }
}
