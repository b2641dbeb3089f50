//! Donation Relay Library
//!
//! Accepts donations, splits each across sender, pool, operator and
//! sponsor according to a fixed percentage plan, advances participant
//! levels, and periodically checks the pool balance for an arbitrage
//! opportunity.
//!
//! Created: 2026-10-19

pub mod admission;
pub mod chain;
pub mod clock;
pub mod config;
pub mod contracts;
pub mod distribution;
pub mod error;
pub mod ledger;
pub mod processor;
pub mod quote;
pub mod scheduler;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::{load_config_from_file, RelayConfig, Tunables};
pub use error::{DeadlineStage, DonationError};
pub use processor::{DonationProcessor, ProcessorSettings};
pub use scheduler::{ArbitrageScheduler, ScanOutcome};
pub use types::{DonationReceipt, DonationRequest, LegReceipt, Participant, RecipientRole};
