//! Rate limiting primitives.
//!
//! This module provides the building blocks for quota enforcement:
//! - [`RateLimiter`]: The core trait for a limiter that can wait for capacity.
//! - [`Rate`]: A refill rate, possibly infinite.
//! - [`TokenBucket`](strategies::TokenBucket): The in-memory token bucket.
//! - [`QuotaPool`](pool::QuotaPool): Token name → limiter resolution with a global fallback.
//!
//! # Architecture
//!
//! - **Pool**: `QuotaPool` maps each quota token to its own limiter. It is built once at
//!   startup and never mutated afterwards, so resolving a limiter takes no lock.
//! - **Logic**: `TokenBucket` owns its state behind its own mutex. Requests for different
//!   tokens never contend with each other.
//! - **Waiting**: a limiter reserves units up front and sleeps until the reservation is due.
//!   If the reservation would land after the deadline it fails without consuming anything.

use crate::error::WaitError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

pub mod pool;
pub mod strategies;
pub use pool::QuotaPool;
pub use strategies::TokenBucket;

/// Refill rate of a limiter, in tokens per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Rate(f64);

impl Rate {
    /// No limit at all: every request is admitted immediately.
    pub const INFINITE: Rate = Rate(f64::INFINITY);

    /// `n` tokens per second. Negative or NaN rates are treated as zero.
    pub fn per_second(n: f64) -> Self {
        if n.is_nan() || n < 0.0 {
            Rate(0.0)
        } else {
            Rate(n)
        }
    }

    /// One token every `interval`. A zero interval means no limit.
    pub fn every(interval: Duration) -> Self {
        if interval.is_zero() {
            return Self::INFINITE;
        }
        Rate(1.0 / interval.as_secs_f64())
    }

    /// Whether this rate disables limiting.
    pub fn is_infinite(&self) -> bool {
        self.0.is_infinite()
    }

    /// Tokens per second.
    pub fn as_per_second(&self) -> f64 {
        self.0
    }

    /// Time needed to accumulate `tokens` at this rate, `None` if it never happens.
    pub(crate) fn duration_for(&self, tokens: f64) -> Option<Duration> {
        if tokens <= 0.0 || self.is_infinite() {
            return Some(Duration::ZERO);
        }
        if self.0 <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(tokens / self.0).ok()
    }

    /// Tokens accumulated over `elapsed` at this rate.
    pub(crate) fn tokens_for(&self, elapsed: Duration) -> f64 {
        if self.0 <= 0.0 {
            return 0.0;
        }
        elapsed.as_secs_f64() * self.0
    }
}

/// Core interface for a quota limiter.
///
/// Implementations must do their own internal synchronization; callers never
/// lock around a limiter.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Wait until `permits` units are available, or fail if that cannot happen
    /// before `deadline`.
    ///
    /// Dropping the returned future aborts the wait.
    async fn acquire(&self, permits: u64, deadline: Instant) -> Result<(), WaitError>;

    /// Maximum number of units available at once.
    fn burst(&self) -> u64;

    /// Refill rate.
    fn rate(&self) -> Rate;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_converts_interval_to_rate() {
        let r = Rate::every(Duration::from_millis(250));
        assert!((r.as_per_second() - 4.0).abs() < f64::EPSILON);
        assert!(Rate::every(Duration::ZERO).is_infinite());
    }

    #[test]
    fn per_second_clamps_invalid_values() {
        assert_eq!(Rate::per_second(-1.0).as_per_second(), 0.0);
        assert_eq!(Rate::per_second(f64::NAN).as_per_second(), 0.0);
        assert!(Rate::per_second(f64::INFINITY).is_infinite());
    }

    #[test]
    fn duration_for_handles_zero_and_infinite_rates() {
        assert_eq!(Rate::per_second(0.0).duration_for(1.0), None);
        assert_eq!(Rate::per_second(0.0).duration_for(0.0), Some(Duration::ZERO));
        assert_eq!(Rate::INFINITE.duration_for(100.0), Some(Duration::ZERO));
        assert_eq!(Rate::per_second(2.0).duration_for(1.0), Some(Duration::from_millis(500)));
    }
}
