//! Token-bucket rate limiter for outbound dependency calls.
//!
//! [`TokenBucket`] holds up to `capacity` tokens and refills at
//! `refill_rate` tokens per second. Refill is computed lazily on every
//! acquisition, so an idle bucket costs nothing. Acquisition never blocks:
//! an empty bucket is reported to the caller, which decides what to do.

use std::sync::Mutex;
use std::time::Instant;

struct BucketState {
    /// Currently available tokens (fractional for sub-token accumulation).
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
///
/// Tokens never go below zero and never exceed `capacity`.
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    inner: Mutex<BucketState>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// # Arguments
    ///
    /// * `capacity`: maximum burst size (tokens available initially).
    /// * `refill_rate`: tokens added per second.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            inner: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: now,
            }),
        }
    }

    /// Try to take one token. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) against an explicit clock reading.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let Ok(mut state) = self.inner.lock() else {
            tracing::warn!("token bucket lock poisoned; denying acquisition");
            return false;
        };
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available at `now`, after refill.
    pub fn available_at(&self, now: Instant) -> f64 {
        match self.inner.lock() {
            Ok(mut state) => {
                self.refill(&mut state, now);
                state.tokens
            }
            Err(_) => 0.0,
        }
    }

    /// Tokens available right now.
    pub fn available(&self) -> f64 {
        self.available_at(Instant::now())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        // A clock reading older than the last refill adds nothing.
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if now > state.last_refill {
            state.last_refill = now;
        }
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
    }
}
