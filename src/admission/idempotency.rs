//! Duplicate-submission guard
//!
//! One donation per sender address per window, regardless of amount or
//! sponsor. The key is written only after a successful distribution, so a
//! request whose retries were exhausted can be resubmitted immediately.
//!
//! Created: 2026-10-19

use super::store::TtlStore;
use crate::error::DonationError;
use crate::validation::canonical_address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Sentinel stored under each key
const SENTINEL: &str = "1";

pub struct IdempotencyGuard {
    store: Arc<dyn TtlStore>,
    window: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn TtlStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Store key for a sender (case-insensitive)
    pub fn key_for(sender: &str) -> String {
        format!("tx:{}", canonical_address(sender))
    }

    /// Reject if the sender already donated inside the window.
    ///
    /// A store outage does not block donations: the error is logged and the
    /// request proceeds.
    pub async fn check(&self, sender: &str) -> Result<(), DonationError> {
        let key = Self::key_for(sender);
        match self.store.exists(&key).await {
            Ok(true) => {
                debug!("Duplicate donation rejected: {}", sender);
                Err(DonationError::DuplicateSubmission(sender.to_string()))
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!("Idempotency store unavailable, admitting {}: {:#}", sender, e);
                Ok(())
            }
        }
    }

    /// Mark the sender as having donated. Only call after success.
    pub async fn record(&self, sender: &str) {
        let key = Self::key_for(sender);
        if let Err(e) = self.store.set(&key, SENTINEL, self.window).await {
            error!(
                "Failed to record idempotency key {}, duplicates from this sender will not be suppressed: {:#}",
                key, e
            );
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
