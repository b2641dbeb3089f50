//! Arbitrage Scheduler
//!
//! Periodic pool scan. Every interval:
//!   1. take the distribution lock (no donation can move funds meanwhile)
//!   2. read the pool balance
//!   3. below threshold: nothing to do
//!   4. otherwise quote half the balance and hand the quote to the sink
//!
//! The lock is held for the whole check-and-trigger. Every failure is
//! logged and the loop waits for the next tick; nothing here can stop the
//! process.
//!
//! Created: 2026-10-19

use crate::chain::{Asset, ChainGateway};
use crate::distribution::{DistributionLock, LockPurpose};
use crate::quote::{QuoteRequest, SwapQuoter, TradeSink};
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ArbitrageSettings {
    pub interval: Duration,
    /// Pool balance at or above which a quote is requested
    pub threshold: U256,
    pub pool_address: Address,
    /// Asset whose pool balance is watched and sold
    pub pool_asset: Asset,
    pub sell_token: String,
    pub buy_token: String,
    /// Bound on each balance read and quote call
    pub call_timeout: Duration,
}

/// What one scan did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    BelowThreshold { balance: U256 },
    Triggered { balance: U256, trade_size: U256 },
    /// Balance read, quote or sink failed
    Unavailable(String),
}

pub struct ArbitrageScheduler {
    gateway: Arc<dyn ChainGateway>,
    quoter: Arc<dyn SwapQuoter>,
    sink: Arc<dyn TradeSink>,
    lock: Arc<DistributionLock>,
    settings: ArbitrageSettings,
}

impl ArbitrageScheduler {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        quoter: Arc<dyn SwapQuoter>,
        sink: Arc<dyn TradeSink>,
        lock: Arc<DistributionLock>,
        settings: ArbitrageSettings,
    ) -> Self {
        Self {
            gateway,
            quoter,
            sink,
            lock,
            settings,
        }
    }

    /// One check-and-trigger under the distribution lock
    pub async fn scan_once(&self) -> ScanOutcome {
        let _guard = self.lock.acquire(LockPurpose::ArbitrageScan).await;

        let balance = match tokio::time::timeout(
            self.settings.call_timeout,
            self.gateway
                .balance_of(self.settings.pool_asset, self.settings.pool_address),
        )
        .await
        {
            Ok(Ok(balance)) => balance,
            Ok(Err(e)) => {
                warn!("Pool balance unavailable: {:#}", e);
                return ScanOutcome::Unavailable(format!("balance: {:#}", e));
            }
            Err(_) => {
                warn!("Pool balance read timed out after {:?}", self.settings.call_timeout);
                return ScanOutcome::Unavailable("balance: timed out".to_string());
            }
        };

        if balance < self.settings.threshold {
            debug!(
                "Pool balance {} below threshold {}, no arbitrage",
                balance, self.settings.threshold
            );
            return ScanOutcome::BelowThreshold { balance };
        }

        let trade_size = balance / U256::from(2u64);
        info!(
            "Pool balance {} reached threshold {}, quoting {}",
            balance, self.settings.threshold, trade_size
        );

        let request = QuoteRequest {
            sell_token: self.settings.sell_token.clone(),
            buy_token: self.settings.buy_token.clone(),
            sell_amount: trade_size,
        };

        let quote = match tokio::time::timeout(self.settings.call_timeout, self.quoter.quote(&request)).await {
            Ok(Ok(quote)) => quote,
            Ok(Err(e)) => {
                warn!("Quote service unavailable: {:#}", e);
                return ScanOutcome::Unavailable(format!("quote: {:#}", e));
            }
            Err(_) => {
                warn!("Quote request timed out after {:?}", self.settings.call_timeout);
                return ScanOutcome::Unavailable("quote: timed out".to_string());
            }
        };

        if let Err(e) = self.sink.execute(&quote).await {
            error!("Trade sink rejected quote: {:#}", e);
            return ScanOutcome::Unavailable(format!("sink: {:#}", e));
        }

        ScanOutcome::Triggered { balance, trade_size }
    }

    /// Scan every interval until `shutdown` flips to true.
    /// The first scan happens one interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            "Arbitrage scheduler started (every {:?}, threshold {})",
            self.settings.interval, self.settings.threshold
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.scan_once().await;
                    debug!("Arbitrage scan: {:?}", outcome);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Arbitrage scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingQuoter, RecordingSink, ScriptedGateway, POOL};

    struct Harness {
        scheduler: Arc<ArbitrageScheduler>,
        gateway: Arc<ScriptedGateway>,
        quoter: Arc<RecordingQuoter>,
        sink: Arc<RecordingSink>,
    }

    fn harness(quoter: RecordingQuoter) -> Harness {
        let gateway = Arc::new(ScriptedGateway::new());
        let quoter = Arc::new(quoter);
        let sink = Arc::new(RecordingSink::new());
        let settings = ArbitrageSettings {
            interval: DEFAULT_SCAN_INTERVAL,
            threshold: U256::from(1000u64),
            pool_address: POOL.parse().unwrap(),
            pool_asset: Asset::Native,
            sell_token: "MATIC".into(),
            buy_token: "USDT".into(),
            call_timeout: Duration::from_secs(30),
        };
        let scheduler = ArbitrageScheduler::new(
            gateway.clone(),
            quoter.clone(),
            sink.clone(),
            Arc::new(DistributionLock::new()),
            settings,
        );
        Harness {
            scheduler: Arc::new(scheduler),
            gateway,
            quoter,
            sink,
        }
    }

    #[tokio::test]
    async fn test_below_threshold_is_noop() {
        let h = harness(RecordingQuoter::new());
        h.gateway.set_balance(Some(U256::from(999u64)));

        let outcome = h.scheduler.scan_once().await;
        assert_eq!(outcome, ScanOutcome::BelowThreshold { balance: U256::from(999u64) });
        assert!(h.quoter.requests().is_empty());
        assert!(h.sink.executed().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_quotes_half_balance() {
        let h = harness(RecordingQuoter::new());
        h.gateway.set_balance(Some(U256::from(5001u64)));

        let outcome = h.scheduler.scan_once().await;
        assert_eq!(
            outcome,
            ScanOutcome::Triggered {
                balance: U256::from(5001u64),
                trade_size: U256::from(2500u64),
            }
        );
        assert_eq!(h.quoter.requests()[0].sell_amount, U256::from(2500u64));
        assert_eq!(h.sink.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_absorbed() {
        let h = harness(RecordingQuoter::failing());
        h.gateway.set_balance(Some(U256::from(5000u64)));
        assert!(matches!(h.scheduler.scan_once().await, ScanOutcome::Unavailable(_)));
        assert!(h.sink.executed().is_empty());

        h.gateway.set_balance(None);
        assert!(matches!(h.scheduler.scan_once().await, ScanOutcome::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scans_each_interval_until_shutdown() {
        let h = harness(RecordingQuoter::new());
        let (tx, rx) = watch::channel(false);

        let scheduler = h.scheduler.clone();
        let task = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.gateway.balance_queries(), 0);

        tokio::time::sleep(DEFAULT_SCAN_INTERVAL * 2).await;
        assert_eq!(h.gateway.balance_queries(), 2);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
