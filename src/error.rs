//! Donation error taxonomy
//!
//! Every way a submission can end without a receipt. The retry loop only
//! retries `Transfer`; everything else surfaces to the caller directly.
//!
//! Created: 2026-10-19

use crate::types::RecipientRole;
use alloy::primitives::U256;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where the request deadline ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineStage {
    /// Checking the idempotency store
    Admission,
    /// Inside a leg transfer
    Transfer,
    /// Waiting between attempts
    Backoff,
}

impl fmt::Display for DeadlineStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeadlineStage::Admission => write!(f, "admission"),
            DeadlineStage::Transfer => write!(f, "transfer"),
            DeadlineStage::Backoff => write!(f, "backoff"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DonationError {
    #[error("invalid {field} address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("too many requests, try again later")]
    RateLimitExceeded,

    #[error("wait a few minutes between donations from {0}")]
    DuplicateSubmission(String),

    #[error("transfer of {amount} to {role} {recipient} failed: {reason}")]
    Transfer {
        role: RecipientRole,
        recipient: String,
        amount: U256,
        reason: String,
    },

    #[error("donation failed after {attempts} attempts")]
    ProcessingFailed {
        attempts: u32,
        #[source]
        last: Box<DonationError>,
    },

    #[error("request deadline exceeded during {0}")]
    DeadlineExceeded(DeadlineStage),

    #[error("timed out after {0:?} waiting for the distribution lock")]
    LockTimeout(Duration),

    #[error("external service unavailable: {0}")]
    ExternalServiceUnavailable(String),
}

impl DonationError {
    /// Only leg transfer failures are retried at attempt granularity
    pub fn is_retryable(&self) -> bool {
        matches!(self, DonationError::Transfer { .. })
    }

    /// Malformed address or amount
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DonationError::InvalidAddress { .. } | DonationError::InvalidAmount(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DonationError::DeadlineExceeded(_) | DonationError::LockTimeout(_)
        )
    }
}
