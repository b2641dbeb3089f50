//! Distribution Lock: the one correctness-critical contention point
//!
//! Serializes every donation's leg transfers and every arbitrage
//! check-and-trigger, so the pool balance is never read while a
//! distribution is mid-flight and two donations never interleave.
//! This caps throughput at one in-flight distribution per process.
//!
//! The lock is process-local; it does not coordinate multiple instances.
//!
//! Created: 2026-10-19

use crate::error::DonationError;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Who holds the lock (for logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPurpose {
    Distribution,
    ArbitrageScan,
}

impl fmt::Display for LockPurpose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LockPurpose::Distribution => write!(f, "distribution"),
            LockPurpose::ArbitrageScan => write!(f, "arbitrage scan"),
        }
    }
}

/// Global mutual-exclusion resource with occupancy instrumentation
#[derive(Debug, Default)]
pub struct DistributionLock {
    inner: Mutex<()>,
    holders: AtomicUsize,
    peak_holders: AtomicUsize,
    acquisitions: AtomicU64,
}

/// Held while a distribution or arbitrage scan runs
pub struct DistributionGuard<'a> {
    lock: &'a DistributionLock,
    purpose: LockPurpose,
    acquired_at: Instant,
    _guard: MutexGuard<'a, ()>,
}

impl DistributionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock without a bound
    pub async fn acquire(&self, purpose: LockPurpose) -> DistributionGuard<'_> {
        let started = Instant::now();
        let guard = self.inner.lock().await;
        self.enter(purpose, guard, started)
    }

    /// Wait at most `limit` for the lock
    pub async fn acquire_within(
        &self,
        purpose: LockPurpose,
        limit: Duration,
    ) -> Result<DistributionGuard<'_>, DonationError> {
        let started = Instant::now();
        match tokio::time::timeout(limit, self.inner.lock()).await {
            Ok(guard) => Ok(self.enter(purpose, guard, started)),
            Err(_) => Err(DonationError::LockTimeout(limit)),
        }
    }

    fn enter<'a>(
        &'a self,
        purpose: LockPurpose,
        guard: MutexGuard<'a, ()>,
        started: Instant,
    ) -> DistributionGuard<'a> {
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_holders.fetch_max(holders, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        let waited = started.elapsed();
        if waited > Duration::from_millis(100) {
            debug!("Distribution lock acquired for {} after {:?}", purpose, waited);
        }

        DistributionGuard {
            lock: self,
            purpose,
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }

    /// Highest number of simultaneous holders ever observed (must stay <= 1)
    pub fn peak_holders(&self) -> usize {
        self.peak_holders.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

impl DistributionGuard<'_> {
    pub fn purpose(&self) -> LockPurpose {
        self.purpose
    }
}

impl Drop for DistributionGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` releases the mutex
        self.lock.holders.fetch_sub(1, Ordering::SeqCst);
        debug!(
            "Distribution lock released by {} after {:?}",
            self.purpose,
            self.acquired_at.elapsed()
        );
    }
}
