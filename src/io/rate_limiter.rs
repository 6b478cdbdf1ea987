//! # Write Rate Limiting
//!
//! Writers pass every append-path write through a [`RateLimiter`] before it
//! reaches the descriptor. The limiter may block and may grant fewer bytes
//! than requested; the writer then writes exactly the granted prefix and
//! asks again for the rest.
//!
//! [`TokenBucket`] refills a fixed budget once per refill period. Unused
//! budget does not carry over, and a single grant never exceeds one period's
//! budget, so bursts are bounded by `bytes_per_sec * refill_period`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use eyre::{ensure, Result};
use parking_lot::Mutex;

use crate::config::{DEFAULT_RATE_LIMITER_REFILL_US, MIN_RATE_LIMITER_REFILL_US};

pub trait RateLimiter: Send + Sync {
    /// Blocks until some budget is available and returns the number of bytes
    /// the caller may write, `1..=bytes` for a non-zero request.
    fn request_token(&self, bytes: usize) -> usize;
}

/// Requests tokens from `limiter` until it grants a non-zero amount.
pub(crate) fn acquire(limiter: &dyn RateLimiter, bytes: usize) -> usize {
    loop {
        let granted = limiter.request_token(bytes);
        if granted > 0 {
            return granted.min(bytes);
        }
        std::thread::yield_now();
    }
}

#[derive(Debug)]
struct BucketState {
    available: u64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    bytes_per_period: u64,
    refill_period: Duration,
    state: Mutex<BucketState>,
    total_bytes_through: AtomicU64,
    total_requests: AtomicU64,
}

impl TokenBucket {
    pub fn new(bytes_per_sec: u64, refill_period: Duration) -> Result<Self> {
        ensure!(bytes_per_sec > 0, "rate limiter needs a positive byte rate");
        ensure!(
            refill_period >= Duration::from_micros(MIN_RATE_LIMITER_REFILL_US),
            "refill period {:?} is shorter than the {}us minimum",
            refill_period,
            MIN_RATE_LIMITER_REFILL_US
        );

        let per_period =
            (bytes_per_sec as u128 * refill_period.as_micros() / 1_000_000).max(1) as u64;

        Ok(Self {
            bytes_per_period: per_period,
            refill_period,
            state: Mutex::new(BucketState {
                available: per_period,
                last_refill: Instant::now(),
            }),
            total_bytes_through: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        })
    }

    /// A bucket refilled every `DEFAULT_RATE_LIMITER_REFILL_US`.
    pub fn with_rate(bytes_per_sec: u64) -> Result<Self> {
        Self::new(bytes_per_sec, Duration::from_micros(DEFAULT_RATE_LIMITER_REFILL_US))
    }

    pub fn bytes_per_period(&self) -> u64 {
        self.bytes_per_period
    }

    pub fn total_bytes_through(&self) -> u64 {
        self.total_bytes_through.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill);
        if elapsed >= self.refill_period {
            state.available = self.bytes_per_period;
            state.last_refill = now;
        }
    }
}

impl RateLimiter for TokenBucket {
    fn request_token(&self, bytes: usize) -> usize {
        if bytes == 0 {
            return 0;
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                self.refill(&mut state, now);

                if state.available > 0 {
                    let granted = (bytes as u64).min(state.available);
                    state.available -= granted;
                    self.total_bytes_through.fetch_add(granted, Ordering::Relaxed);
                    return granted as usize;
                }

                (state.last_refill + self.refill_period).saturating_duration_since(now)
            };

            std::thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rate() {
        assert!(TokenBucket::new(0, Duration::from_millis(100)).is_err());
    }

    #[test]
    fn rejects_too_short_refill_period() {
        let err = TokenBucket::new(1 << 20, Duration::from_micros(10)).unwrap_err();

        assert!(err.to_string().contains("shorter than"));
    }

    #[test]
    fn budget_is_rate_times_period() {
        let bucket = TokenBucket::new(1_000_000, Duration::from_millis(100)).unwrap();

        assert_eq!(bucket.bytes_per_period(), 100_000);
    }

    #[test]
    fn with_rate_uses_default_refill_period() {
        let bucket = TokenBucket::with_rate(1_000_000).unwrap();

        assert_eq!(bucket.bytes_per_period(), 100_000);
        assert!(TokenBucket::with_rate(0).is_err());
    }

    #[test]
    fn grant_is_capped_by_available_budget() {
        let bucket = TokenBucket::new(10_000, Duration::from_millis(100)).unwrap();

        assert_eq!(bucket.request_token(600), 600);
        assert_eq!(bucket.request_token(600), 400);
        assert_eq!(bucket.total_bytes_through(), 1000);
        assert_eq!(bucket.total_requests(), 2);
    }

    #[test]
    fn zero_request_is_free() {
        let bucket = TokenBucket::new(10_000, Duration::from_millis(100)).unwrap();

        assert_eq!(bucket.request_token(0), 0);
        assert_eq!(bucket.total_requests(), 0);
    }

    #[test]
    fn exhausted_bucket_grants_again_after_refill() {
        let bucket = TokenBucket::new(10_000, Duration::from_millis(20)).unwrap();
        assert_eq!(bucket.request_token(200), 200);

        let granted = bucket.request_token(50);

        assert_eq!(granted, 50);
        assert_eq!(bucket.total_bytes_through(), 250);
    }

    #[test]
    fn acquire_retries_zero_grants() {
        struct Stingy(Mutex<u32>);

        impl RateLimiter for Stingy {
            fn request_token(&self, bytes: usize) -> usize {
                let mut calls = self.0.lock();
                *calls += 1;
                if *calls < 3 {
                    0
                } else {
                    bytes
                }
            }
        }

        let limiter = Stingy(Mutex::new(0));

        assert_eq!(acquire(&limiter, 42), 42);
        assert_eq!(*limiter.0.lock(), 3);
    }
}
