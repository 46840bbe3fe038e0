//! Token-bucket limiter: continuous refill, burst up to capacity.
//!
//! Each identifier owns a bucket of `capacity` tokens refilling at
//! `refill_rate` tokens per second. Every call consumes one token when
//! available. The refill-and-consume step runs atomically in the store, so
//! concurrent callers across gateway instances never over- or
//! under-count.
use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::ports::ratelimit_store::{BucketState, RateLimitStore, StoreResult};

use super::LimitDecision;

#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Maximum tokens, i.e. the largest allowed burst.
    pub capacity: i64,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Prepended to the identifier to form the store key.
    pub key_prefix: String,
    /// Store-state freshness; recommended 2x the window.
    pub ttl: Duration,
}

pub struct TokenBucket {
    store: Arc<dyn RateLimitStore>,
    config: TokenBucketConfig,
}

impl TokenBucket {
    pub fn new(store: Arc<dyn RateLimitStore>, config: TokenBucketConfig) -> Self {
        tracing::debug!(
            capacity = config.capacity,
            refill_rate = config.refill_rate,
            key_prefix = %config.key_prefix,
            "token bucket limiter initialized"
        );
        Self { store, config }
    }

    /// Check the limit for `identifier`, consuming a token when allowed.
    pub async fn allow(&self, identifier: &str) -> StoreResult<LimitDecision> {
        let key = format!("{}{}", self.config.key_prefix, identifier);
        let now_ms = Utc::now().timestamp_millis();

        let reply = self
            .store
            .token_bucket(
                &key,
                self.config.capacity,
                self.config.refill_rate,
                now_ms,
                self.config.ttl.as_secs() as i64,
            )
            .await?;

        let retry_after = if reply.allowed {
            Duration::ZERO
        } else {
            // Time until one token refills.
            Duration::from_secs_f64(1.0 / self.config.refill_rate)
        };

        Ok(LimitDecision {
            allowed: reply.allowed,
            remaining: reply.remaining.max(0),
            reset_at: reply.reset_at,
            retry_after,
        })
    }

    /// Read the stored bucket state for `identifier` without consuming a
    /// token. `None` for an identifier that has never been seen.
    pub async fn state(&self, identifier: &str) -> StoreResult<Option<BucketState>> {
        let key = format!("{}{}", self.config.key_prefix, identifier);
        self.store.bucket_state(&key).await
    }

    /// Clear the bucket for `identifier`.
    pub async fn reset(&self, identifier: &str) -> StoreResult<()> {
        let key = format!("{}{}", self.config.key_prefix, identifier);
        self.store.remove(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{adapters::memory_store::MemoryStore, core::ratelimit::refill_rate};

    fn bucket(capacity: i64, window: Duration) -> TokenBucket {
        TokenBucket::new(
            Arc::new(MemoryStore::new()),
            TokenBucketConfig {
                capacity,
                refill_rate: refill_rate(capacity, window),
                key_prefix: "rate_limit:token-bucket:".into(),
                ttl: window * 2,
            },
        )
    }

    #[tokio::test]
    async fn first_capacity_calls_allowed_then_denied() {
        let limiter = bucket(5, Duration::from_secs(60));

        for expected_remaining in (0..5).rev() {
            let d = limiter.allow("ip:10.0.0.1").await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
            assert_eq!(d.retry_after, Duration::ZERO);
        }

        let denied = limiter.allow("ip:10.0.0.1").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[tokio::test]
    async fn identifiers_have_independent_buckets() {
        let limiter = bucket(1, Duration::from_secs(60));
        assert!(limiter.allow("ip:10.0.0.1").await.unwrap().allowed);
        assert!(!limiter.allow("ip:10.0.0.1").await.unwrap().allowed);
        assert!(limiter.allow("ip:10.0.0.2").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn refill_allows_more_calls() {
        // 2 tokens per second so a short sleep is one refill.
        let limiter = bucket(2, Duration::from_secs(1));
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(!limiter.allow("k").await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(limiter.allow("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn concurrent_calls_consume_exactly_capacity() {
        let limiter = Arc::new(bucket(4, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..16 {
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
        assert_eq!(allowed, 4);
    }

    #[tokio::test]
    async fn state_inspects_without_consuming() {
        let limiter = bucket(3, Duration::from_secs(60));
        assert!(limiter.state("k").await.unwrap().is_none());

        limiter.allow("k").await.unwrap();
        let state = limiter.state("k").await.unwrap().unwrap();
        assert!(state.tokens < 3.0);

        // Inspection does not spend tokens: two more allows still pass.
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(!limiter.allow("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn reset_refills_the_bucket() {
        let limiter = bucket(1, Duration::from_secs(60));
        assert!(limiter.allow("k").await.unwrap().allowed);
        assert!(!limiter.allow("k").await.unwrap().allowed);

        limiter.reset("k").await.unwrap();
        assert!(limiter.allow("k").await.unwrap().allowed);
    }
}
