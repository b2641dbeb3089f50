//! Distribution Plan: fixed-percentage split of a donation
//!
//! Each leg receives `floor(total * percent / 100)` using integer
//! arithmetic. The standard plan sums to 89%, not 100%: the remaining 11%
//! plus the truncation dust stays with the sender and is reported as the
//! receipt's shortfall. Whether the 11% is a reserved remainder or a defect
//! is a product decision, so the plan is not normalized here.
//!
//! Created: 2026-10-19

use crate::types::RecipientRole;
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

/// One (role, percentage) entry of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub role: RecipientRole,
    pub percent: u64,
}

impl PlanEntry {
    pub const fn new(role: RecipientRole, percent: u64) -> Self {
        Self { role, percent }
    }
}

/// Standard plan: sender 50, pool 10, operator 19, sponsor 10 (= 89)
pub const STANDARD_PLAN: [PlanEntry; 4] = [
    PlanEntry::new(RecipientRole::Sender, 50),
    PlanEntry::new(RecipientRole::Pool, 10),
    PlanEntry::new(RecipientRole::Operator, 19),
    PlanEntry::new(RecipientRole::Sponsor, 10),
];

/// A single computed leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedLeg {
    pub role: RecipientRole,
    pub percent: u64,
    pub amount: U256,
}

/// Ordered list of legs executed in sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPlan {
    entries: Vec<PlanEntry>,
}

impl DistributionPlan {
    pub fn new(entries: Vec<PlanEntry>) -> Self {
        Self { entries }
    }

    pub fn standard() -> Self {
        Self::new(STANDARD_PLAN.to_vec())
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Sum of all percentages (89 for the standard plan)
    pub fn total_percent(&self) -> u64 {
        self.entries.iter().map(|e| e.percent).sum()
    }

    /// `floor(total * percent / 100)`
    pub fn leg_amount(total: U256, percent: u64) -> U256 {
        total * U256::from(percent) / U256::from(100u64)
    }

    /// Compute every leg in plan order
    pub fn split(&self, total: U256) -> Vec<PlannedLeg> {
        self.entries
            .iter()
            .map(|entry| PlannedLeg {
                role: entry.role,
                percent: entry.percent,
                amount: Self::leg_amount(total, entry.percent),
            })
            .collect()
    }

    /// Sum of all legs if every leg is sent
    pub fn planned_total(&self, total: U256) -> U256 {
        self.split(total)
            .iter()
            .fold(U256::ZERO, |acc, leg| acc + leg.amount)
    }
}

impl Default for DistributionPlan {
    fn default() -> Self {
        Self::standard()
    }
}
