//! Fund Distributor
//!
//! Executes one distribution attempt: every leg of the plan, in order,
//! under the global distribution lock, each transfer bounded by the request
//! deadline.
//!
//! Failure semantics:
//! - A leg whose address is invalid or whose transfer fails aborts the
//!   remaining legs of this attempt.
//! - Legs already sent are NOT compensated. A retried attempt starts from
//!   the first leg again and may pay those recipients twice. This is an
//!   accepted, documented risk; there is no rollback logic.
//! - An empty sponsor skips only the sponsor leg (logged); the skipped
//!   amount is not transferred.
//!
//! Deadline accounting: the request deadline bounds network time only.
//! Time spent queued on the lock is added to the caller's deadline; the
//! queueing itself is bounded by `lock_wait` and fails as `LockTimeout`.
//!
//! Created: 2026-10-19

use super::lock::{DistributionLock, LockPurpose};
use super::plan::DistributionPlan;
use crate::chain::{Asset, ChainGateway};
use crate::error::{DeadlineStage, DonationError};
use crate::types::{DonationRequest, LegReceipt, RecipientRole};
use crate::validation::parse_address;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fixed recipients of a distribution
#[derive(Debug, Clone)]
pub struct RoutingAddresses {
    pub pool: String,
    pub operator: String,
}

pub struct FundDistributor {
    gateway: Arc<dyn ChainGateway>,
    lock: Arc<DistributionLock>,
    plan: DistributionPlan,
    routing: RoutingAddresses,
    asset: Asset,
    /// Upper bound on waiting for the lock, independent of the request deadline
    lock_wait: Duration,
}

impl FundDistributor {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        lock: Arc<DistributionLock>,
        plan: DistributionPlan,
        routing: RoutingAddresses,
        asset: Asset,
        lock_wait: Duration,
    ) -> Self {
        Self {
            gateway,
            lock,
            plan,
            routing,
            asset,
            lock_wait,
        }
    }

    pub fn plan(&self) -> &DistributionPlan {
        &self.plan
    }

    fn recipient_for<'a>(&'a self, role: RecipientRole, request: &'a DonationRequest) -> &'a str {
        match role {
            RecipientRole::Sender => &request.sender,
            RecipientRole::Pool => &self.routing.pool,
            RecipientRole::Operator => &self.routing.operator,
            RecipientRole::Sponsor => request.sponsor.trim(),
        }
    }

    /// Run one attempt. Returns one receipt per plan leg on success.
    ///
    /// `deadline` is pushed back by however long the lock was contended.
    pub async fn distribute(
        &self,
        request: &DonationRequest,
        deadline: &mut Instant,
    ) -> Result<Vec<LegReceipt>, DonationError> {
        let queued_at = Instant::now();
        let _guard = self
            .lock
            .acquire_within(LockPurpose::Distribution, self.lock_wait)
            .await?;

        let queued = queued_at.elapsed();
        if !queued.is_zero() {
            debug!("{} waited {:?} for the distribution lock", request.sender, queued);
            *deadline += queued;
        }
        let deadline = *deadline;

        let legs = self.plan.split(request.amount);
        let mut receipts = Vec::with_capacity(legs.len());

        for leg in legs {
            let recipient = self.recipient_for(leg.role, request);

            if leg.role == RecipientRole::Sponsor && recipient.is_empty() {
                warn!(
                    "No sponsor for {}, skipping {}% sponsor leg ({})",
                    request.sender, leg.percent, leg.amount
                );
                receipts.push(LegReceipt {
                    role: leg.role,
                    recipient: String::new(),
                    percent: leg.percent,
                    amount: leg.amount,
                    tx_hash: None,
                    skipped: Some("invalid sponsor address: empty".to_string()),
                });
                continue;
            }

            let address = parse_address(leg.role.field_name(), recipient)?;

            if leg.amount.is_zero() {
                debug!("Skipping zero-amount {} leg for {}", leg.role, request.sender);
                receipts.push(LegReceipt {
                    role: leg.role,
                    recipient: recipient.to_string(),
                    percent: leg.percent,
                    amount: leg.amount,
                    tx_hash: None,
                    skipped: Some("zero amount".to_string()),
                });
                continue;
            }

            info!("Sending {} to {} ({}, {}%)", leg.amount, recipient, leg.role, leg.percent);

            let tx_hash = match tokio::time::timeout_at(
                deadline,
                self.gateway.transfer(self.asset, address, leg.amount),
            )
            .await
            {
                Ok(Ok(hash)) => hash,
                Ok(Err(e)) => {
                    return Err(DonationError::Transfer {
                        role: leg.role,
                        recipient: recipient.to_string(),
                        amount: leg.amount,
                        reason: format!("{:#}", e),
                    });
                }
                Err(_) => {
                    warn!(
                        "Deadline hit while sending {} leg of {} to {}",
                        leg.role, request.sender, recipient
                    );
                    return Err(DonationError::DeadlineExceeded(DeadlineStage::Transfer));
                }
            };

            debug!("{} leg confirmed: {}", leg.role, tx_hash);
            receipts.push(LegReceipt {
                role: leg.role,
                recipient: recipient.to_string(),
                percent: leg.percent,
                amount: leg.amount,
                tx_hash: Some(tx_hash),
                skipped: None,
            });
        }

        Ok(receipts)
    }
}
