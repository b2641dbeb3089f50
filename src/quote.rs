//! Swap Quotes
//!
//! Client for a 0x-style swap quote API plus the pluggable sink that
//! receives a quote once the arbitrage threshold is crossed.
//!
//! The relay does not run a trading strategy: it asks for a price and hands
//! the answer to the sink. `LoggingTradeSink` is the only sink shipped.
//!
//! Created: 2026-10-19
//!
//! Usage:
//!   Set QUOTE_API_URL (default https://api.0x.org/swap/v1/quote) and,
//!   optionally, QUOTE_API_KEY for the `0x-api-key` header.

use alloy::primitives::U256;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_QUOTE_API_URL: &str = "https://api.0x.org/swap/v1/quote";

/// What to sell, what to buy, how much
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: U256,
}

/// Parsed quote; `raw` keeps the full response for the sink
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub sell_token: String,
    pub buy_token: String,
    pub sell_amount: U256,
    pub buy_amount: Option<U256>,
    pub price: Option<Decimal>,
    pub raw: serde_json::Value,
}

/// Fields we read from the quote response (0x swap/v1 shape)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    buy_amount: Option<String>,
    #[serde(default)]
    sell_amount: Option<String>,
}

impl SwapQuote {
    /// Build from a raw JSON response body
    pub fn from_response(request: &QuoteRequest, raw: serde_json::Value) -> Result<Self> {
        let parsed: QuoteResponse = serde_json::from_value(raw.clone())
            .context("Unexpected quote response shape")?;

        let sell_amount = match parsed.sell_amount.as_deref() {
            Some(s) => s.parse::<U256>().context("Invalid sellAmount in quote")?,
            None => request.sell_amount,
        };
        let buy_amount = parsed
            .buy_amount
            .as_deref()
            .map(|s| s.parse::<U256>())
            .transpose()
            .context("Invalid buyAmount in quote")?;

        Ok(Self {
            sell_token: request.sell_token.clone(),
            buy_token: request.buy_token.clone(),
            sell_amount,
            buy_amount,
            price: parsed.price,
            raw,
        })
    }
}

#[async_trait]
pub trait SwapQuoter: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote>;
}

/// Receives a quote once the pool crosses the threshold
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn execute(&self, quote: &SwapQuote) -> Result<()>;
}

/// HTTP quote client
pub struct ZeroExQuoter {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl ZeroExQuoter {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build quote HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SwapQuoter for ZeroExQuoter {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let sell_amount = request.sell_amount.to_string();
        let mut builder = self.client.get(&self.endpoint).query(&[
            ("sellToken", request.sell_token.as_str()),
            ("buyToken", request.buy_token.as_str()),
            ("sellAmount", sell_amount.as_str()),
        ]);
        if let Some(key) = &self.api_key {
            builder = builder.header("0x-api-key", key);
        }

        debug!(
            "Requesting quote: sell {} {} for {}",
            sell_amount, request.sell_token, request.buy_token
        );

        let response = builder
            .send()
            .await
            .context("Quote request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("Quote API returned {}: {}", status, snippet);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .context("Quote response is not JSON")?;

        SwapQuote::from_response(request, raw)
    }
}

/// Logs the quote; no trade is placed
#[derive(Debug, Default)]
pub struct LoggingTradeSink;

#[async_trait]
impl TradeSink for LoggingTradeSink {
    async fn execute(&self, quote: &SwapQuote) -> Result<()> {
        info!(
            "Arbitrage quote: sell {} {} → buy {} {} | price={}",
            quote.sell_amount,
            quote.sell_token,
            quote
                .buy_amount
                .map(|a| a.to_string())
                .unwrap_or_else(|| "?".to_string()),
            quote.buy_token,
            quote
                .price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string()),
        );
        Ok(())
    }
}
