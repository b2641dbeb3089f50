//! Donation Processor
//!
//! Orchestrates one donation submission end to end:
//!
//! 1. Validate sender, amount and (if present) sponsor
//! 2. Take a token from the global rate limiter
//! 3. Check the idempotency guard
//! 4. Distribute, retrying failed transfers with linear backoff
//! 5. Record the idempotency key (success only)
//! 6. Advance the participant ledger
//!
//! The whole submission runs against one deadline set at entry. Time spent
//! queued behind the distribution lock does not count: each attempt pushes
//! the deadline back by its queueing time, and the queueing itself is
//! bounded by the lock wait (see `FundDistributor`). Running out of the
//! deadline is reported as `DeadlineExceeded`, never folded into
//! `ProcessingFailed`.
//!
//! Addresses are validated exactly as submitted. Surrounding whitespace is
//! a malformed address, not something to strip.
//!
//! Duplicate suppression is check-then-record: the key is only written
//! after the transfers succeed. Two submissions from the same sender that
//! both pass the check before either records will both distribute. The
//! lock serialises them but does not re-check the guard.
//!
//! Created: 2026-10-19

use crate::admission::{IdempotencyGuard, RateLimiter};
use crate::distribution::FundDistributor;
use crate::error::{DeadlineStage, DonationError};
use crate::ledger::{ParticipantRepository, ProgressionRules};
use crate::types::{DonationReceipt, DonationRequest, LegReceipt, Participant};
use crate::validation::{canonical_address, parse_address, validate_amount};
use alloy::primitives::U256;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Delay before the next attempt, given the 1-based attempt that just failed
pub trait BackoffPolicy: Send + Sync + fmt::Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `unit * attempt`: 1s, 2s, 3s, ... with a one-second unit
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub unit: Duration,
}

impl LinearBackoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_UNIT)
    }
}

impl BackoffPolicy for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub max_attempts: u32,
    pub request_deadline: Duration,
    pub min_donation: Option<U256>,
    pub max_donation: Option<U256>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
            min_donation: None,
            max_donation: None,
        }
    }
}

pub struct DonationProcessor {
    limiter: Arc<RateLimiter>,
    guard: IdempotencyGuard,
    distributor: FundDistributor,
    ledger: Arc<dyn ParticipantRepository>,
    backoff: Arc<dyn BackoffPolicy>,
    settings: ProcessorSettings,
}

impl DonationProcessor {
    pub fn new(
        limiter: Arc<RateLimiter>,
        guard: IdempotencyGuard,
        distributor: FundDistributor,
        ledger: Arc<dyn ParticipantRepository>,
        backoff: Arc<dyn BackoffPolicy>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            limiter,
            guard,
            distributor,
            ledger,
            backoff,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn rules(&self) -> &ProgressionRules {
        self.ledger.rules()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Submit one donation
    pub async fn submit(&self, request: DonationRequest) -> Result<DonationReceipt, DonationError> {
        let mut deadline = Instant::now() + self.settings.request_deadline;

        self.validate(&request)?;

        if !self.limiter.allow() {
            warn!(
                "Rate limit hit, rejecting donation from {} (retry in {:?})",
                request.sender,
                self.limiter.retry_after()
            );
            return Err(DonationError::RateLimitExceeded);
        }

        tokio::time::timeout_at(deadline, self.guard.check(&request.sender))
            .await
            .map_err(|_| DonationError::DeadlineExceeded(DeadlineStage::Admission))??;

        info!("Processing donation of {} from {}", request.amount, request.sender);

        let (legs, attempts) = self.distribute_with_retry(&request, &mut deadline).await?;

        // The transfers went out; a slow store must not turn that into a failure
        if tokio::time::timeout_at(deadline, self.guard.record(&request.sender))
            .await
            .is_err()
        {
            error!("Deadline hit while recording idempotency key for {}", request.sender);
        }

        let sponsor = request.has_sponsor().then(|| canonical_address(&request.sponsor));
        let update = self
            .ledger
            .upsert_with_threshold_advance(
                &canonical_address(&request.sender),
                sponsor.as_deref(),
                Utc::now(),
            )
            .await;

        let receipt =
            DonationReceipt::from_legs(&request, legs, attempts, update.participant, update.leveled_up);
        info!(
            "Donation from {} complete: {} transferred, {} retained, {} attempt(s)",
            receipt.sender, receipt.transferred, receipt.shortfall, receipt.attempts
        );
        Ok(receipt)
    }

    /// Participant snapshot by address (any case)
    pub async fn participant(&self, address: &str) -> Result<Option<Participant>, DonationError> {
        parse_address("participant", address)?;
        Ok(self.ledger.get(&canonical_address(address)).await)
    }

    fn validate(&self, request: &DonationRequest) -> Result<(), DonationError> {
        parse_address("sender", &request.sender)?;
        validate_amount(
            request.amount,
            self.settings.min_donation,
            self.settings.max_donation,
        )?;
        // An empty sponsor only skips its leg; a malformed one rejects the request
        if request.has_sponsor() {
            parse_address("sponsor", &request.sponsor)?;
        }
        Ok(())
    }

    async fn distribute_with_retry(
        &self,
        request: &DonationRequest,
        deadline: &mut Instant,
    ) -> Result<(Vec<LegReceipt>, u32), DonationError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.distributor.distribute(request, deadline).await {
                Ok(legs) => return Ok((legs, attempt)),
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    warn!("Donation from {} aborted: {}", request.sender, e);
                    return Err(e);
                }
            };

            warn!(
                "Attempt {}/{} for {} failed: {}",
                attempt, max_attempts, request.sender, err
            );

            if attempt >= max_attempts {
                error!(
                    "Giving up on donation from {} after {} attempts",
                    request.sender, attempt
                );
                return Err(DonationError::ProcessingFailed {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff.delay(attempt);
            if Instant::now() + delay >= *deadline {
                warn!(
                    "Backoff of {:?} would pass the deadline for {}, aborting",
                    delay, request.sender
                );
                return Err(DonationError::DeadlineExceeded(DeadlineStage::Backoff));
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{MemoryTtlStore, TtlStore};
    use crate::chain::Asset;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::distribution::{DistributionLock, DistributionPlan, LockPurpose, RoutingAddresses};
    use crate::ledger::InMemoryLedger;
    use crate::testing::{ScriptedGateway, OPERATOR, POOL, SENDER, SPONSOR};

    struct Harness {
        processor: Arc<DonationProcessor>,
        gateway: Arc<ScriptedGateway>,
        store: Arc<MemoryTtlStore>,
        lock: Arc<DistributionLock>,
    }

    fn harness_with(gateway: ScriptedGateway, settings: ProcessorSettings) -> Harness {
        let gateway = Arc::new(gateway);
        let store = Arc::new(MemoryTtlStore::new(Arc::new(MonotonicClock::new())));
        let lock = Arc::new(DistributionLock::new());
        let distributor = FundDistributor::new(
            gateway.clone(),
            lock.clone(),
            DistributionPlan::standard(),
            RoutingAddresses {
                pool: POOL.to_string(),
                operator: OPERATOR.to_string(),
            },
            Asset::Native,
            Duration::from_secs(60),
        );
        let processor = DonationProcessor::new(
            Arc::new(RateLimiter::new(10, 1, Arc::new(ManualClock::new()))),
            IdempotencyGuard::new(store.clone(), Duration::from_secs(300)),
            distributor,
            Arc::new(InMemoryLedger::new(ProgressionRules::default())),
            Arc::new(LinearBackoff::default()),
            settings,
        );
        Harness {
            processor: Arc::new(processor),
            gateway,
            store,
            lock,
        }
    }

    fn harness(gateway: ScriptedGateway) -> Harness {
        harness_with(gateway, ProcessorSettings::default())
    }

    fn key() -> String {
        IdempotencyGuard::key_for(SENDER)
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = LinearBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_key_and_creates_participant() {
        let h = harness(ScriptedGateway::new());
        let receipt = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.transferred, U256::from(890u64));
        assert_eq!(receipt.shortfall, U256::from(110u64));
        assert_eq!(receipt.participant.donation_count, 0);
        assert!(h.store.exists(&key()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_attempt_succeeds_after_linear_backoff() {
        let gateway = ScriptedGateway::new();
        gateway.fail_next_transfers(2);
        let h = harness(gateway);

        let start = Instant::now();
        let processor = h.processor.clone();
        let task = tokio::spawn(async move {
            processor
                .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
                .await
        });

        // Between the second and third attempts: nothing recorded yet
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(h.store.get(&key()).is_none());

        let receipt = task.await.unwrap().unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(h.gateway.transfer_calls(), 6);

        // 1s after attempt 1, 2s after attempt 2
        let first_confirmed = h.gateway.transfers()[0].confirmed_at;
        assert_eq!(first_confirmed - start, Duration::from_secs(3));
        assert!(h.store.get(&key()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_no_key() {
        let gateway = ScriptedGateway::new();
        gateway.fail_next_transfers(3);
        let h = harness(gateway);

        let err = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap_err();

        assert!(matches!(err, DonationError::ProcessingFailed { attempts: 3, .. }));
        assert!(!h.store.exists(&key()).await.unwrap());
        assert!(h.processor.participant(SENDER).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_rejected_regardless_of_amount_or_sponsor() {
        let h = harness(ScriptedGateway::new());
        h.processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap();

        let upper = SENDER.to_uppercase().replacen("0X", "0x", 1);
        let err = h
            .processor
            .submit(DonationRequest::new(upper, U256::from(7u64), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, DonationError::DuplicateSubmission(_)));
        assert_eq!(h.gateway.transfers().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_expires_after_window() {
        let h = harness(ScriptedGateway::new());
        h.processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        tokio_test::assert_ok!(
            h.processor
                .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_in_backoff_is_not_processing_failed() {
        let gateway = ScriptedGateway::new();
        gateway.fail_next_transfers(3);
        let settings = ProcessorSettings {
            request_deadline: Duration::from_millis(1500),
            ..ProcessorSettings::default()
        };
        let h = harness_with(gateway, settings);

        let err = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap_err();
        assert!(matches!(err, DonationError::DeadlineExceeded(DeadlineStage::Backoff)));
        assert_eq!(h.gateway.transfer_calls(), 2);
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_in_transfer_is_not_retried() {
        let gateway = ScriptedGateway::new().with_transfer_delay(Duration::from_secs(40));
        let h = harness(gateway);

        let err = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap_err();
        assert!(matches!(err, DonationError::DeadlineExceeded(DeadlineStage::Transfer)));
        assert_eq!(h.gateway.transfer_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_scan_hold_does_not_fail_donation() {
        let h = harness(ScriptedGateway::new().with_transfer_delay(Duration::from_secs(1)));

        let lock = h.lock.clone();
        let scan = tokio::spawn(async move {
            let _held = lock.acquire(LockPurpose::ArbitrageScan).await;
            tokio::time::sleep(Duration::from_secs(35)).await;
        });
        tokio::task::yield_now().await;
        assert!(h.lock.is_held());

        let start = Instant::now();
        let receipt = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(h.gateway.transfers().len(), 4);
        assert!(Instant::now() - start > h.processor.settings().request_deadline);
        assert!(h.store.get(&key()).is_some());
        scan.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_same_sender_both_distribute_before_record() {
        let h = harness(ScriptedGateway::new().with_transfer_delay(Duration::from_millis(100)));

        let first = h.processor.clone();
        let second = h.processor.clone();
        let (a, b) = tokio::join!(
            first.submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR)),
            second.submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR)),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(h.gateway.transfers().len(), 8);

        let err = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), SPONSOR))
            .await
            .unwrap_err();
        assert!(matches!(err, DonationError::DuplicateSubmission(_)));
        assert_eq!(h.gateway.transfers().len(), 8);
    }

    #[tokio::test]
    async fn test_padded_sponsor_is_rejected() {
        let h = harness(ScriptedGateway::new());
        let padded = format!(" {} ", SPONSOR);

        let err = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), padded))
            .await
            .unwrap_err();
        assert!(matches!(err, DonationError::InvalidAddress { field: "sponsor", .. }));
        assert_eq!(h.gateway.transfer_calls(), 0);
        assert_eq!(h.processor.limiter().available(), 10);
    }

    #[tokio::test]
    async fn test_validation_runs_before_rate_limit() {
        let h = harness(ScriptedGateway::new());
        for _ in 0..20 {
            let err = h
                .processor
                .submit(DonationRequest::new("0xnot-an-address", U256::from(1u64), ""))
                .await
                .unwrap_err();
            assert!(err.is_validation());
        }
        assert_eq!(h.processor.limiter().available(), 10);
    }

    #[tokio::test]
    async fn test_rejects_bad_amounts_and_sponsors() {
        let settings = ProcessorSettings {
            min_donation: Some(U256::from(100u64)),
            ..ProcessorSettings::default()
        };
        let h = harness_with(ScriptedGateway::new(), settings);

        let zero = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::ZERO, ""))
            .await
            .unwrap_err();
        assert!(matches!(zero, DonationError::InvalidAmount(_)));

        let small = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(99u64), ""))
            .await
            .unwrap_err();
        assert!(matches!(small, DonationError::InvalidAmount(_)));

        let sponsor = h
            .processor
            .submit(DonationRequest::new(SENDER, U256::from(1000u64), "0x12"))
            .await
            .unwrap_err();
        assert!(matches!(
            sponsor,
            DonationError::InvalidAddress { field: "sponsor", .. }
        ));
        assert_eq!(h.gateway.transfer_calls(), 0);
    }

    #[tokio::test]
    async fn test_burst_rejects_after_capacity() {
        let h = harness(ScriptedGateway::new());
        let mut rate_limited = 0;
        for i in 0..12u64 {
            // distinct senders so the idempotency guard never fires
            let sender = format!("0x{:040x}", i + 1);
            match h
                .processor
                .submit(DonationRequest::new(sender, U256::from(1000u64), ""))
                .await
            {
                Ok(_) => {}
                Err(DonationError::RateLimitExceeded) => rate_limited += 1,
                Err(other) => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(rate_limited, 2);
    }
}
