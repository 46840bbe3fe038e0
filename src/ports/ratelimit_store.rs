//! Port for the shared key-value store backing the rate limiters.
//!
//! Both operations are atomic check-and-record steps executed server-side
//! (a script on the Redis adapter, a mutex-guarded transition on the
//! in-memory adapter) so no check-then-modify gap is visible to concurrent
//! callers. Atomicity lives in the store, never in client locks.
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("script execution failed: {0}")]
    Script(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Raw outcome of a token-bucket refill-and-consume step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketReply {
    pub allowed: bool,
    /// Whole tokens left after this call, floored at zero.
    pub remaining: i64,
    /// Unix seconds at which the bucket is full again.
    pub reset_at: i64,
}

/// Raw outcome of a sliding-window cleanup-count-insert step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReply {
    pub allowed: bool,
    /// Requests in the window after this call (including this one when
    /// allowed).
    pub count: i64,
    /// Score of the oldest member, 0 when the window is empty.
    pub oldest: i64,
}

/// Stored bucket state, read without refilling or consuming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: i64,
}

/// Read-only view of a window set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowState {
    /// Members scored inside the current window.
    pub count: i64,
    /// Score of the oldest member, 0 when the set is empty.
    pub oldest: i64,
}

/// Atomic rate-limit state transitions against the shared store.
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    /// Liveness probe, used by `/health` and the fail-open policy tests.
    async fn ping(&self) -> StoreResult<()>;

    /// Refill the bucket at `key` for elapsed time, then try to consume one
    /// token. State is persisted with `ttl_secs` freshness.
    async fn token_bucket(
        &self,
        key: &str,
        capacity: i64,
        refill_rate: f64,
        now_ms: i64,
        ttl_secs: i64,
    ) -> StoreResult<BucketReply>;

    /// Expire members scored at or before `window_start`, count the rest,
    /// and insert `member` at `now_secs` when under `limit`.
    async fn sliding_window(
        &self,
        key: &str,
        window_start: i64,
        now_secs: i64,
        limit: i64,
        member: &str,
        ttl_secs: i64,
    ) -> StoreResult<WindowReply>;

    /// Read the bucket state at `key` without mutating it. `None` when no
    /// state is stored.
    async fn bucket_state(&self, key: &str) -> StoreResult<Option<BucketState>>;

    /// Count live members (scored after `window_start`) and report the
    /// oldest score at `key`, without inserting or expiring anything.
    async fn window_state(&self, key: &str, window_start: i64) -> StoreResult<WindowState>;

    /// Drop all state for `key` (admin override, tests).
    async fn remove(&self, key: &str) -> StoreResult<()>;
}
