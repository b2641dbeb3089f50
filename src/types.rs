//! Core data structures shared across the relay
//!
//! Participants, donation requests, distribution receipts and the
//! recipient roles of a distribution plan.
//!
//! Created: 2026-10-19

use alloy::primitives::{TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recipient roles of a distribution plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    /// The donating participant itself
    Sender,
    /// Pooled balance watched by the arbitrage scheduler
    Pool,
    Operator,
    /// Referring participant; may be absent on a request
    Sponsor,
}

impl RecipientRole {
    /// Field name used in validation errors and logs
    pub fn field_name(&self) -> &'static str {
        match self {
            RecipientRole::Sender => "sender",
            RecipientRole::Pool => "pool",
            RecipientRole::Operator => "operator",
            RecipientRole::Sponsor => "sponsor",
        }
    }
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.field_name())
    }
}

/// Inbound donation request
///
/// The signature is carried opaquely; verifying it is the transport's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationRequest {
    pub sender: String,
    /// Amount in the smallest unit of the donation asset
    pub amount: U256,
    pub signature: String,
    /// Empty when the participant has no sponsor
    pub sponsor: String,
}

impl DonationRequest {
    pub fn new(sender: impl Into<String>, amount: U256, sponsor: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            amount,
            signature: String::new(),
            sponsor: sponsor.into(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn has_sponsor(&self) -> bool {
        !self.sponsor.trim().is_empty()
    }
}

/// Participant progression state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Canonical (lowercase) address, unique key
    pub address: String,
    /// Index into the phase table, always `< phase count`
    pub level: usize,
    /// Donations counted toward the next level-up
    pub donation_count: u32,
    pub last_donation: DateTime<Utc>,
    /// Sponsor as submitted on the first donation, never dereferenced
    pub sponsor: Option<String>,
}

/// Outcome of one leg of a distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegReceipt {
    pub role: RecipientRole,
    pub recipient: String,
    pub percent: u64,
    pub amount: U256,
    /// Set when the transfer was confirmed
    pub tx_hash: Option<TxHash>,
    /// Set when the leg was not sent (empty sponsor, zero amount)
    pub skipped: Option<String>,
}

impl LegReceipt {
    pub fn is_sent(&self) -> bool {
        self.tx_hash.is_some()
    }
}

/// Result of a successfully processed donation
#[derive(Debug, Clone)]
pub struct DonationReceipt {
    pub sender: String,
    pub requested: U256,
    /// Sum of the legs actually sent
    pub transferred: U256,
    /// `requested - transferred`; never zero with the standard 89% plan
    pub shortfall: U256,
    pub attempts: u32,
    pub legs: Vec<LegReceipt>,
    pub participant: Participant,
    pub leveled_up: bool,
}

impl DonationReceipt {
    pub fn from_legs(
        request: &DonationRequest,
        legs: Vec<LegReceipt>,
        attempts: u32,
        participant: Participant,
        leveled_up: bool,
    ) -> Self {
        let transferred = legs
            .iter()
            .filter(|leg| leg.is_sent())
            .fold(U256::ZERO, |acc, leg| acc + leg.amount);

        Self {
            sender: request.sender.clone(),
            requested: request.amount,
            transferred,
            shortfall: request.amount.saturating_sub(transferred),
            attempts,
            legs,
            participant,
            leveled_up,
        }
    }
}

/// Amount as submitted on the wire: JSON integer or decimal/hex string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(u64),
    Text(String),
}

impl AmountInput {
    /// Parse into U256; `None` when the text is not a number
    pub fn to_u256(&self) -> Option<U256> {
        match self {
            AmountInput::Number(n) => Some(U256::from(*n)),
            AmountInput::Text(s) => s.trim().parse::<U256>().ok(),
        }
    }
}
