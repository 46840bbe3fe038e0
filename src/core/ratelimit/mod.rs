//! Distributed rate-limit primitives.
//!
//! Two algorithms share the store port, a `rate_limit:<algo>:` key prefix
//! and a TTL of twice the window (bounding store memory without affecting
//! correctness). Both return a uniform [`LimitDecision`].
pub mod sliding_window;
pub mod token_bucket;

use std::time::Duration;

pub use sliding_window::{SlidingWindow, SlidingWindowConfig};
pub use token_bucket::{TokenBucket, TokenBucketConfig};

/// Uniform allow/deny outcome from either algorithm.
#[derive(Debug, Clone, Copy)]
pub struct LimitDecision {
    pub allowed: bool,
    /// Requests (or tokens) left, floored at zero.
    pub remaining: i64,
    /// Unix seconds at which the limit resets.
    pub reset_at: i64,
    /// How long to wait before retrying; zero when allowed.
    pub retry_after: Duration,
}

/// Tokens per second needed to sustain `limit` requests per `window`.
pub fn refill_rate(limit: i64, window: Duration) -> f64 {
    limit as f64 / window.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_rate_from_limit_and_window() {
        assert!((refill_rate(100, Duration::from_secs(60)) - 100.0 / 60.0).abs() < 1e-9);
        assert!((refill_rate(10, Duration::from_secs(1)) - 10.0).abs() < 1e-9);
    }
}
