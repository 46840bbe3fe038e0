//! Redis-backed rate-limit store.
//!
//! Each operation is one Lua script evaluated on the server, so the whole
//! check-and-record transition is atomic under any number of concurrent
//! gateway instances. The connection manager multiplexes a single
//! reconnecting connection and is safe to clone per call.
use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};

use crate::ports::ratelimit_store::{
    BucketReply, BucketState, RateLimitStore, StoreError, StoreResult, WindowReply, WindowState,
};

/// Atomic refill-and-consume.
///
/// KEYS[1] bucket hash; ARGV: capacity, refill rate (tokens/sec), now
/// (ms), TTL (s). Returns {allowed, whole tokens remaining, reset unix
/// seconds}.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last_refill = tonumber(redis.call('HGET', KEYS[1], 'last_refill'))

local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

if tokens == nil then
    tokens = capacity
    last_refill = now
end

local elapsed_sec = math.max(0, now - last_refill) / 1000.0
tokens = math.min(capacity, tokens + elapsed_sec * refill_rate)
last_refill = now

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

local tokens_needed = capacity - tokens
local seconds_to_full = 0
if tokens_needed > 0 then
    seconds_to_full = math.ceil(tokens_needed / refill_rate)
end
local reset_time = math.floor((now + seconds_to_full * 1000) / 1000)

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens))
redis.call('HSET', KEYS[1], 'last_refill', tostring(last_refill))
redis.call('EXPIRE', KEYS[1], ttl)

return {allowed, math.floor(tokens), reset_time}
"#;

/// Atomic cleanup-count-insert.
///
/// KEYS[1] window sorted set; ARGV: window start (s), now (s), limit,
/// member, TTL (s). Returns {allowed, count, oldest score}.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local window_start = tonumber(ARGV[1])
local current_time = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]
local ttl = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', window_start)

local current_count = redis.call('ZCARD', KEYS[1])

local allowed = 0
if current_count < limit then
    redis.call('ZADD', KEYS[1], current_time, member)
    current_count = current_count + 1
    allowed = 1
end

local oldest = 0
local oldest_entries = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
if #oldest_entries > 0 then
    oldest = tonumber(oldest_entries[2])
end

redis.call('EXPIRE', KEYS[1], ttl)

return {allowed, current_count, oldest}
"#;

pub struct RedisStore {
    manager: ConnectionManager,
    token_bucket: Script,
    sliding_window: Script,
}

impl RedisStore {
    /// Connect and verify the store is reachable.
    pub async fn connect(url: &str) -> eyre::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| eyre::eyre!("invalid redis url: {e}"))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| eyre::eyre!("redis connection failed: {e}"))?;

        let store = Self {
            manager,
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
        };
        store.ping().await.map_err(|e| eyre::eyre!("redis ping failed: {e}"))?;

        tracing::info!("rate-limit store connected");
        Ok(store)
    }

    fn parse_triple(values: Vec<i64>, what: &str) -> StoreResult<(i64, i64, i64)> {
        match values.as_slice() {
            [a, b, c] => Ok((*a, *b, *c)),
            other => Err(StoreError::Script(format!(
                "{what} returned {} values, expected 3",
                other.len()
            ))),
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    async fn token_bucket(
        &self,
        key: &str,
        capacity: i64,
        refill_rate: f64,
        now_ms: i64,
        ttl_secs: i64,
    ) -> StoreResult<BucketReply> {
        let mut conn = self.manager.clone();
        let values: Vec<i64> = self
            .token_bucket
            .key(key)
            .arg(capacity)
            .arg(refill_rate)
            .arg(now_ms)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Script(e.to_string()))?;

        let (allowed, remaining, reset_at) = Self::parse_triple(values, "token bucket script")?;
        Ok(BucketReply {
            allowed: allowed == 1,
            remaining,
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
        let mut conn = self.manager.clone();
        let values: Vec<i64> = self
            .sliding_window
            .key(key)
            .arg(window_start)
            .arg(now_secs)
            .arg(limit)
            .arg(member)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Script(e.to_string()))?;

        let (allowed, count, oldest) = Self::parse_triple(values, "sliding window script")?;
        Ok(WindowReply {
            allowed: allowed == 1,
            count,
            oldest,
        })
    }

    async fn bucket_state(&self, key: &str) -> StoreResult<Option<BucketState>> {
        let mut conn = self.manager.clone();
        let fields: std::collections::HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        if fields.is_empty() {
            return Ok(None);
        }

        let tokens = fields
            .get("tokens")
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| StoreError::Script("bucket hash missing 'tokens'".into()))?;
        let last_refill_ms = fields
            .get("last_refill")
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v as i64)
            .ok_or_else(|| StoreError::Script("bucket hash missing 'last_refill'".into()))?;

        Ok(Some(BucketState {
            tokens,
            last_refill_ms,
        }))
    }

    async fn window_state(&self, key: &str, window_start: i64) -> StoreResult<WindowState> {
        let mut conn = self.manager.clone();
        let count: i64 = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(format!("({window_start}"))
            .arg("+inf")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let oldest_entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let oldest = oldest_entries
            .first()
            .map(|(_, score)| *score as i64)
            .unwrap_or(0);

        Ok(WindowState { count, oldest })
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_triple_requires_three_values() {
        assert!(RedisStore::parse_triple(vec![1, 2, 3], "t").is_ok());
        assert!(RedisStore::parse_triple(vec![1, 2], "t").is_err());
        assert!(RedisStore::parse_triple(vec![], "t").is_err());
    }

    #[test]
    fn invalid_url_is_rejected_before_connecting() {
        let client = redis::Client::open("not-a-redis-url");
        assert!(client.is_err());
    }
}
