use crate::error::WaitError;
use crate::rate_limit::{Rate, RateLimiter};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Burst of the default global limiter: large enough to never bind, small enough
/// to stay exact in `f64` arithmetic.
pub const DEFAULT_GLOBAL_BURST: u64 = 1 << 31;

/// A Token Bucket rate limiter.
///
/// Replenishes tokens at a fixed `rate` per second, up to `burst`. Starts full.
///
/// Waiting works by reservation: `acquire` takes the units immediately (the
/// balance may go negative, which queues later callers behind it) and sleeps
/// until the balance would have been repaid. A reservation that would not be
/// repaid before the deadline is refused without touching the balance, so an
/// admitted wait never outlives its deadline.
#[derive(Debug)]
pub struct TokenBucket {
    rate: Rate,
    burst: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

/// Units taken from the bucket, due at `ready_at`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    ready_at: Instant,
    permits: u64,
}

impl Reservation {
    /// Instant at which the reserved units are available.
    pub fn ready_at(&self) -> Instant {
        self.ready_at
    }

    /// Units held by this reservation.
    pub fn permits(&self) -> u64 {
        self.permits
    }
}

impl TokenBucket {
    /// Create a new full TokenBucket.
    pub fn new(rate: Rate, burst: u64) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState { tokens: burst as f64, last: Instant::now() }),
        }
    }

    /// One token every `interval`, holding at most `burst`.
    pub fn every(interval: Duration, burst: u64) -> Self {
        Self::new(Rate::every(interval), burst)
    }

    /// A bucket that never limits. Used as the default global limiter.
    pub fn unlimited() -> Self {
        Self::new(Rate::INFINITE, DEFAULT_GLOBAL_BURST)
    }

    /// Tokens currently available (negative while reservations are outstanding).
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.advance(&mut state, Instant::now());
        state.tokens
    }

    /// Reserve `permits` units at `now`, refusing if they would not be available
    /// within `max_wait`.
    pub fn reserve(
        &self,
        permits: u64,
        now: Instant,
        max_wait: Duration,
    ) -> Result<Reservation, WaitError> {
        if permits == 0 || self.rate.is_infinite() {
            return Ok(Reservation { ready_at: now, permits: 0 });
        }
        if permits > self.burst {
            return Err(WaitError::ExceedsBurst { requested: permits, burst: self.burst });
        }

        let mut state = self.lock();
        self.advance(&mut state, now);

        let remaining = state.tokens - permits as f64;
        let wait = self
            .rate
            .duration_for(-remaining)
            .ok_or(WaitError::Starved { requested: permits })?;
        if wait > max_wait {
            return Err(WaitError::WouldExceedDeadline {
                requested: permits,
                wait,
                remaining: max_wait,
            });
        }
        let ready_at = now.checked_add(wait).ok_or(WaitError::Starved { requested: permits })?;

        state.tokens = remaining;
        Ok(Reservation { ready_at, permits })
    }

    /// Give back a reservation that will not be used.
    ///
    /// Reservations already due at `now` are considered consumed.
    pub fn cancel(&self, reservation: &Reservation, now: Instant) {
        if reservation.permits == 0 || reservation.ready_at <= now {
            return;
        }
        let mut state = self.lock();
        self.advance(&mut state, now);
        state.tokens = (state.tokens + reservation.permits as f64).min(self.burst as f64);
    }

    fn advance(&self, state: &mut BucketState, now: Instant) {
        // A caller that sampled `now` before another caller locked may arrive late.
        if now <= state.last {
            return;
        }
        let elapsed = now.duration_since(state.last);
        state.tokens = (state.tokens + self.rate.tokens_for(elapsed)).min(self.burst as f64);
        state.last = now;
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Refunds a reservation if the waiting future is dropped before it is due.
struct PendingReservation<'a> {
    bucket: &'a TokenBucket,
    reservation: Option<Reservation>,
}

impl PendingReservation<'_> {
    fn complete(mut self) {
        self.reservation = None;
    }
}

impl Drop for PendingReservation<'_> {
    fn drop(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            self.bucket.cancel(&reservation, Instant::now());
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self, permits: u64, deadline: Instant) -> Result<(), WaitError> {
        let now = Instant::now();
        let reservation = self.reserve(permits, now, deadline.saturating_duration_since(now))?;
        if reservation.ready_at > now {
            let pending = PendingReservation { bucket: self, reservation: Some(reservation) };
            tokio::time::sleep_until(reservation.ready_at).await;
            pending.complete();
        }
        Ok(())
    }

    fn burst(&self) -> u64 {
        self.burst
    }

    fn rate(&self) -> Rate {
        self.rate
    }
}
