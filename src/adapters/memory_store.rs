//! In-process rate-limit store.
//!
//! Implements the same atomic check-and-record transitions as the Redis
//! scripts, serialized under a mutex instead of on a server. Suitable for
//! single-instance deployments and for the test suites; counters are not
//! shared across gateway processes.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ports::ratelimit_store::{
    BucketReply, BucketState, RateLimitStore, StoreResult, WindowReply, WindowState,
};

#[derive(Debug, Clone)]
struct BucketEntry {
    tokens: f64,
    last_refill_ms: i64,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct WindowEntry {
    /// (score seconds, member), kept sorted by score.
    members: Vec<(i64, String)>,
    expires_at_ms: i64,
}

/// Mutex-guarded store mirroring the scripted semantics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, BucketEntry>>,
    windows: Mutex<HashMap<String, WindowEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn token_bucket(
        &self,
        key: &str,
        capacity: i64,
        refill_rate: f64,
        now_ms: i64,
        ttl_secs: i64,
    ) -> StoreResult<BucketReply> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());

        let state = buckets
            .get(key)
            .filter(|s| s.expires_at_ms > now_ms)
            .cloned()
            .unwrap_or(BucketEntry {
                tokens: capacity as f64,
                last_refill_ms: now_ms,
                expires_at_ms: 0,
            });

        let elapsed_s = (now_ms - state.last_refill_ms).max(0) as f64 / 1000.0;
        let mut tokens = (state.tokens + elapsed_s * refill_rate).min(capacity as f64);

        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }

        let tokens_needed = capacity as f64 - tokens;
        let secs_to_full = if tokens_needed > 0.0 {
            (tokens_needed / refill_rate).ceil() as i64
        } else {
            0
        };
        let reset_at = (now_ms + secs_to_full * 1000) / 1000;

        buckets.insert(
            key.to_string(),
            BucketEntry {
                tokens,
                last_refill_ms: now_ms,
                expires_at_ms: now_ms + ttl_secs * 1000,
            },
        );

        Ok(BucketReply {
            allowed,
            remaining: tokens.floor() as i64,
            reset_at,
        })
    }

    async fn sliding_window(
        &self,
        key: &str,
        window_start: i64,
        now_secs: i64,
        limit: i64,
        member: &str,
        ttl_secs: i64,
    ) -> StoreResult<WindowReply> {
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());

        let state = windows.entry(key.to_string()).or_default();
        if state.expires_at_ms != 0 && state.expires_at_ms <= now_secs * 1000 {
            state.members.clear();
        }

        state.members.retain(|(score, _)| *score > window_start);

        let mut count = state.members.len() as i64;
        let allowed = count < limit;
        if allowed {
            let pos = state
                .members
                .partition_point(|(score, _)| *score <= now_secs);
            state.members.insert(pos, (now_secs, member.to_string()));
            count += 1;
        }

        let oldest = state.members.first().map(|(score, _)| *score).unwrap_or(0);
        state.expires_at_ms = (now_secs + ttl_secs) * 1000;

        Ok(WindowReply {
            allowed,
            count,
            oldest,
        })
    }

    async fn bucket_state(&self, key: &str) -> StoreResult<Option<BucketState>> {
        let buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        Ok(buckets.get(key).map(|state| BucketState {
            tokens: state.tokens,
            last_refill_ms: state.last_refill_ms,
        }))
    }

    async fn window_state(&self, key: &str, window_start: i64) -> StoreResult<WindowState> {
        let windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let state = match windows.get(key) {
            Some(state) => state,
            None => {
                return Ok(WindowState {
                    count: 0,
                    oldest: 0,
                });
            }
        };

        let count = state
            .members
            .iter()
            .filter(|(score, _)| *score > window_start)
            .count() as i64;
        let oldest = state.members.first().map(|(score, _)| *score).unwrap_or(0);

        Ok(WindowState { count, oldest })
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.buckets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        self.windows
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        Ok(())
    }
}
