//! In-process collaborator fakes
//!
//! Scripted chain gateway, recording quote client and trade sink. Used by
//! unit tests, the integration suite, and anyone wiring the processor
//! without a chain.

use crate::chain::{Asset, ChainGateway};
use crate::quote::{QuoteRequest, SwapQuote, SwapQuoter, TradeSink};
use alloy::primitives::{Address, TxHash, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub const SENDER: &str = "0x1111111111111111111111111111111111111111";
pub const POOL: &str = "0xa477E1a3F20E0fE460d1fb48cD8323248D3C42DD";
pub const OPERATOR: &str = "0x70f64A79620d35aC2f42Ae755B9776Ac736D1200";
pub const SPONSOR: &str = "0x2222222222222222222222222222222222222222";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A confirmed transfer seen by `ScriptedGateway`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub asset: Asset,
    pub to: Address,
    pub amount: U256,
    /// Call number (1-based) across all transfer calls
    pub call: u32,
    pub confirmed_at: Instant,
}

/// Chain gateway with scripted failures and latency
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    calls: AtomicU32,
    failing_calls: Mutex<HashSet<u32>>,
    fail_next: AtomicU32,
    transfer_delay: Duration,
    transfers: Mutex<Vec<TransferRecord>>,
    balance: Mutex<Option<U256>>,
    balance_queries: AtomicU32,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(Some(U256::ZERO)),
            ..Self::default()
        }
    }

    /// Every transfer sleeps this long before confirming
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = delay;
        self
    }

    /// Make the `n`th transfer call (1-based) fail
    pub fn fail_transfer_number(&self, n: u32) {
        lock(&self.failing_calls).insert(n);
    }

    /// Make the next `count` transfer calls fail
    pub fn fail_next_transfers(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Balance reported by `balance_of`; `None` makes the query fail
    pub fn set_balance(&self, balance: Option<U256>) {
        *lock(&self.balance) = balance;
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        lock(&self.transfers).clone()
    }

    pub fn transfer_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn balance_queries(&self) -> u32 {
        self.balance_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainGateway for ScriptedGateway {
    async fn transfer(&self, asset: Asset, to: Address, amount: U256) -> Result<TxHash> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let scripted = lock(&self.failing_calls).contains(&call);
        let queued = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted || queued {
            return Err(anyhow!("scripted failure on transfer call {}", call));
        }

        if !self.transfer_delay.is_zero() {
            tokio::time::sleep(self.transfer_delay).await;
        }

        lock(&self.transfers).push(TransferRecord {
            asset,
            to,
            amount,
            call,
            confirmed_at: Instant::now(),
        });
        Ok(TxHash::with_last_byte(call as u8))
    }

    async fn balance_of(&self, _asset: Asset, _holder: Address) -> Result<U256> {
        self.balance_queries.fetch_add(1, Ordering::SeqCst);
        let balance = *lock(&self.balance);
        balance.ok_or_else(|| anyhow!("scripted balance failure"))
    }
}

/// Quote client returning a canned quote (or failing) and recording requests
#[derive(Debug, Default)]
pub struct RecordingQuoter {
    requests: Mutex<Vec<QuoteRequest>>,
    fail: AtomicU32,
}

impl RecordingQuoter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let q = Self::default();
        q.fail.store(1, Ordering::SeqCst);
        q
    }

    pub fn requests(&self) -> Vec<QuoteRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl SwapQuoter for RecordingQuoter {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        lock(&self.requests).push(request.clone());
        if self.fail.load(Ordering::SeqCst) > 0 {
            return Err(anyhow!("quote service returned 503"));
        }
        Ok(SwapQuote {
            sell_token: request.sell_token.clone(),
            buy_token: request.buy_token.clone(),
            sell_amount: request.sell_amount,
            buy_amount: Some(request.sell_amount * U256::from(2u64)),
            price: None,
            raw: serde_json::Value::Null,
        })
    }
}

/// Trade sink that only remembers what it was handed
#[derive(Debug, Default)]
pub struct RecordingSink {
    executed: Mutex<Vec<SwapQuote>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<SwapQuote> {
        lock(&self.executed).clone()
    }
}

#[async_trait]
impl TradeSink for RecordingSink {
    async fn execute(&self, quote: &SwapQuote) -> Result<()> {
        lock(&self.executed).push(quote.clone());
        Ok(())
    }
}
