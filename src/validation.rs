//! Address and amount validation
//!
//! Syntactic checks only: `0x` followed by 40 hex digits, any case.
//! No checksum, no on-chain existence check.
//!
//! Created: 2026-10-19

use crate::error::DonationError;
use alloy::primitives::{Address, U256};

/// Hex digits after the `0x` prefix
pub const ADDRESS_HEX_LEN: usize = 40;

/// Returns true if `candidate` is `0x` + 40 hex characters
pub fn is_valid_address(candidate: &str) -> bool {
    match candidate.strip_prefix("0x") {
        Some(hex) => hex.len() == ADDRESS_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Validate and parse an address, naming the offending field on failure
pub fn parse_address(field: &'static str, candidate: &str) -> Result<Address, DonationError> {
    if !is_valid_address(candidate) {
        return Err(DonationError::InvalidAddress {
            field,
            value: candidate.to_string(),
        });
    }
    candidate.parse::<Address>().map_err(|_| DonationError::InvalidAddress {
        field,
        value: candidate.to_string(),
    })
}

/// Canonical form used as ledger and idempotency key
pub fn canonical_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Largest amount whose percentage split cannot overflow U256
pub fn max_splittable_amount() -> U256 {
    U256::MAX / U256::from(100u64)
}

/// Check that an amount is positive, splittable and inside the optional bounds
pub fn validate_amount(
    amount: U256,
    min: Option<U256>,
    max: Option<U256>,
) -> Result<(), DonationError> {
    if amount.is_zero() {
        return Err(DonationError::InvalidAmount("amount must be positive".into()));
    }
    if amount > max_splittable_amount() {
        return Err(DonationError::InvalidAmount(format!("{} is too large", amount)));
    }
    if let Some(min) = min {
        if amount < min {
            return Err(DonationError::InvalidAmount(format!(
                "{} is below the minimum donation {}",
                amount, min
            )));
        }
    }
    if let Some(max) = max {
        if amount > max {
            return Err(DonationError::InvalidAmount(format!(
                "{} is above the maximum donation {}",
                amount, max
            )));
        }
    }
    Ok(())
}
