//! Global Rate Limiter: non-blocking token bucket
//!
//! Purpose:
//!     Caps the request rate across all callers (no per-client partition).
//!     A depleted bucket rejects immediately; there is no queueing.
//!
//! Created: 2026-10-19
//!
//! Design:
//!     - Implemented as GCRA (generic cell rate algorithm), which is an exact
//!       token bucket expressed as a single "theoretical arrival time" (TAT)
//!     - TAT lives in one AtomicU64 (nanos since clock origin), updated by CAS
//!     - capacity C, refill R/s: emission interval T = 1/R, tolerance = (C-1)·T
//!     - A request at `now` is admitted iff max(TAT, now) - now <= tolerance

use crate::clock::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NANOS_PER_SEC: u64 = 1_000_000_000;

pub const DEFAULT_CAPACITY: u32 = 10;
pub const DEFAULT_REFILL_PER_SEC: u32 = 1;

/// Lock-free global token bucket
#[derive(Debug)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    /// Theoretical arrival time, nanoseconds since clock origin
    tat: AtomicU64,
    emission_nanos: u64,
    tolerance_nanos: u64,
    capacity: u32,
}

impl RateLimiter {
    /// Create a bucket holding `capacity` tokens, refilled at `refill_per_sec`.
    /// Both values are clamped to at least 1.
    pub fn new(capacity: u32, refill_per_sec: u32, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let emission_nanos = NANOS_PER_SEC / u64::from(refill_per_sec.max(1));
        Self {
            clock,
            tat: AtomicU64::new(0),
            emission_nanos,
            tolerance_nanos: emission_nanos * u64::from(capacity - 1),
            capacity,
        }
    }

    fn now_nanos(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }

    /// Take one token if available. Never blocks.
    pub fn allow(&self) -> bool {
        let now = self.now_nanos();
        let mut current = self.tat.load(Ordering::Acquire);

        loop {
            let effective = current.max(now);
            if effective - now > self.tolerance_nanos {
                debug!("Rate limiter depleted (capacity {})", self.capacity);
                return false;
            }

            match self.tat.compare_exchange_weak(
                current,
                effective + self.emission_nanos,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Tokens currently available (approximate under contention)
    pub fn available(&self) -> u32 {
        let now = self.now_nanos();
        let effective = self.tat.load(Ordering::Acquire).max(now);
        let debt = effective - now;
        if debt > self.tolerance_nanos {
            return 0;
        }
        ((self.tolerance_nanos - debt) / self.emission_nanos + 1) as u32
    }

    /// Time until the next token becomes available
    pub fn retry_after(&self) -> Duration {
        let now = self.now_nanos();
        let effective = self.tat.load(Ordering::Acquire).max(now);
        let debt = effective - now;
        Duration::from_nanos(debt.saturating_sub(self.tolerance_nanos))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(clock: &Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(10, 1, clock.clone())
    }

    #[test]
    fn test_cold_bucket_admits_capacity_then_rejects() {
        let clock = Arc::new(ManualClock::new());
        let rl = limiter(&clock);

        let admitted = (0..15).filter(|_| rl.allow()).count();
        assert_eq!(admitted, 10);
        assert!(!rl.allow());
        assert_eq!(rl.available(), 0);
    }

    #[test]
    fn test_refills_one_token_per_second() {
        let clock = Arc::new(ManualClock::new());
        let rl = limiter(&clock);
        for _ in 0..10 {
            assert!(rl.allow());
        }
        assert!(!rl.allow());
        assert_eq!(rl.retry_after(), Duration::from_secs(1));

        clock.advance(Duration::from_millis(999));
        assert!(!rl.allow());

        clock.advance(Duration::from_millis(1));
        assert!(rl.allow());
        assert!(!rl.allow());
    }

    #[test]
    fn test_idle_bucket_caps_at_capacity() {
        let clock = Arc::new(ManualClock::new());
        let rl = limiter(&clock);
        assert!(rl.allow());

        clock.advance(Duration::from_secs(60));
        assert_eq!(rl.available(), 10);
        let admitted = (0..20).filter(|_| rl.allow()).count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_concurrent_callers_never_exceed_capacity() {
        let clock = Arc::new(ManualClock::new());
        let rl = Arc::new(limiter(&clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || (0..10).filter(|_| rl.allow()).count())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 10);
    }
}
