//! Chain Access Gateway
//!
//! `ChainGateway` is the relay's only view of the blockchain: send an
//! amount to an address and read a balance. Both calls are slow and
//! fallible; callers bound them with their own deadlines.
//!
//! Implementations:
//! - `RpcChainGateway`: alloy HTTP provider with a local signer. Connects to
//!   the first responsive endpoint of the configured list.
//! - `DryRunGateway`: logs transfers without sending anything.
//!
//! Created: 2026-10-19

use crate::contracts::IERC20;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

/// Asset moved or queried through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    /// Chain's native coin (MATIC on Polygon)
    Native,
    /// ERC20 token at this address
    Token(Address),
}

impl Asset {
    pub fn from_token(token: Option<Address>) -> Self {
        token.map(Asset::Token).unwrap_or(Asset::Native)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Token(addr) => write!(f, "{}", addr),
        }
    }
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Send `amount` of `asset` to `to`; resolves once the tx is confirmed
    async fn transfer(&self, asset: Asset, to: Address, amount: U256) -> Result<TxHash>;

    /// Current balance of `holder`
    async fn balance_of(&self, asset: Asset, holder: Address) -> Result<U256>;
}

/// alloy-backed gateway signing with the relay's key
pub struct RpcChainGateway {
    provider: DynProvider,
    sender: Address,
}

impl RpcChainGateway {
    /// Try each RPC URL in order; keep the first that answers `eth_chainId`
    pub async fn connect(rpc_urls: &[String], private_key: &str, chain_id: u64) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .context("Invalid PRIVATE_KEY")?;
        let signer = signer.with_chain_id(Some(chain_id));
        let sender = signer.address();

        for url in rpc_urls {
            let parsed = match url.parse() {
                Ok(u) => u,
                Err(e) => {
                    warn!("Skipping malformed RPC URL '{}': {}", url, e);
                    continue;
                }
            };

            let provider = ProviderBuilder::new()
                .wallet(signer.clone())
                .connect_http(parsed)
                .erased();

            match provider.get_chain_id().await {
                Ok(id) => {
                    if id != chain_id {
                        warn!("RPC {} reports chain {} (expected {})", url, id, chain_id);
                    }
                    info!("Connected to RPC: {}", url.chars().take(40).collect::<String>());
                    info!("Relay wallet: {}", sender);
                    return Ok(Self { provider, sender });
                }
                Err(e) => {
                    warn!("RPC {} unavailable: {}", url, e);
                }
            }
        }

        bail!("Could not connect to any of {} configured RPC endpoints", rpc_urls.len())
    }

    pub fn sender(&self) -> Address {
        self.sender
    }
}

#[async_trait]
impl ChainGateway for RpcChainGateway {
    async fn transfer(&self, asset: Asset, to: Address, amount: U256) -> Result<TxHash> {
        let pending = match asset {
            Asset::Native => {
                let tx = TransactionRequest::default()
                    .with_from(self.sender)
                    .with_to(to)
                    .with_value(amount);
                self.provider
                    .send_transaction(tx)
                    .await
                    .context("Failed to submit native transfer")?
            }
            Asset::Token(token) => {
                let contract = IERC20::new(token, self.provider.clone());
                contract
                    .transfer(to, amount)
                    .send()
                    .await
                    .context("Failed to submit token transfer")?
            }
        };

        let tx_hash = pending
            .watch()
            .await
            .context("Transfer was not confirmed")?;
        Ok(tx_hash)
    }

    async fn balance_of(&self, asset: Asset, holder: Address) -> Result<U256> {
        match asset {
            Asset::Native => self
                .provider
                .get_balance(holder)
                .await
                .context("eth_getBalance failed"),
            Asset::Token(token) => {
                let contract = IERC20::new(token, self.provider.clone());
                contract
                    .balanceOf(holder)
                    .call()
                    .await
                    .context("balanceOf call failed")
            }
        }
    }
}

/// Logs transfers instead of sending them; reports zero balances
#[derive(Debug, Default)]
pub struct DryRunGateway;

#[async_trait]
impl ChainGateway for DryRunGateway {
    async fn transfer(&self, asset: Asset, to: Address, amount: U256) -> Result<TxHash> {
        info!("DRY RUN: sending {} ({}) to {}", amount, asset, to);
        Ok(TxHash::ZERO)
    }

    async fn balance_of(&self, _asset: Asset, _holder: Address) -> Result<U256> {
        Ok(U256::ZERO)
    }
}
