//! Distribution Module
//!
//! Percentage plan, the global distribution lock, and the distributor that
//! executes one attempt of a donation's legs.
//!
//! Created: 2026-10-19

pub mod distributor;
pub mod lock;
pub mod plan;

pub use distributor::{FundDistributor, RoutingAddresses};
pub use lock::{DistributionGuard, DistributionLock, LockPurpose};
pub use plan::{DistributionPlan, PlanEntry, PlannedLeg, STANDARD_PLAN};
