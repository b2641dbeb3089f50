//! Configuration management
//!
//! Secrets and addresses come from the environment (optionally loaded from
//! an env file via dotenv). Behavioural tunables come from an optional TOML
//! file; every field has a default, so an absent file or an empty one gives
//! the standard relay.
//!
//! Created: 2026-10-19
//!
//! Environment:
//!   RPC_URLS          comma-separated, tried in order
//!   CHAIN_ID          default 137 (Polygon)
//!   PRIVATE_KEY       relay signing key (not needed for --dry-run)
//!   POOL_ADDRESS      pool recipient, balance watched by the scheduler
//!   OPERATOR_ADDRESS  operator recipient
//!   DONATION_TOKEN    ERC20 moved by donations (native coin when unset)
//!   POOL_TOKEN        ERC20 whose pool balance is watched (native when unset)
//!   REDIS_URL         idempotency store (in-memory when unset)
//!   QUOTE_API_URL     default https://api.0x.org/swap/v1/quote
//!   QUOTE_API_KEY     optional
//!   QUOTE_SELL_TOKEN  default POOL_TOKEN address, else MATIC
//!   QUOTE_BUY_TOKEN   default MATIC
//!   LISTEN_ADDR       default 0.0.0.0:8080

use crate::admission::rate_limiter::{DEFAULT_CAPACITY, DEFAULT_REFILL_PER_SEC};
use crate::chain::Asset;
use crate::distribution::{DistributionPlan, PlanEntry, STANDARD_PLAN};
use crate::ledger::{ProgressionRules, DEFAULT_LEVEL_UP_THRESHOLD, DEFAULT_PHASES};
use crate::processor::{ProcessorSettings, DEFAULT_MAX_ATTEMPTS};
use crate::quote::DEFAULT_QUOTE_API_URL;
use crate::types::AmountInput;
use crate::validation::parse_address;
use alloy::primitives::{Address, U256};
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CHAIN_ID: u64 = 137;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_QUOTE_TOKEN: &str = "MATIC";

/// Tunables read from the TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct Tunables {
    #[serde(default = "default_plan")]
    pub plan: Vec<PlanEntry>,
    #[serde(default = "default_phases")]
    pub phases: Vec<u64>,
    #[serde(default = "default_threshold")]
    pub level_up_threshold: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
    #[serde(default = "default_rate_limit_capacity")]
    pub rate_limit_capacity: u32,
    #[serde(default = "default_rate_limit_refill")]
    pub rate_limit_refill_per_sec: u32,
    #[serde(default = "default_idempotency_window_secs")]
    pub idempotency_window_secs: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Pool balance (smallest unit of POOL_TOKEN) that triggers a quote
    #[serde(default = "default_arbitrage_threshold", deserialize_with = "de_u256")]
    pub arbitrage_threshold: U256,
    #[serde(default, deserialize_with = "de_opt_u256")]
    pub min_donation: Option<U256>,
    #[serde(default, deserialize_with = "de_opt_u256")]
    pub max_donation: Option<U256>,
}

fn default_plan() -> Vec<PlanEntry> { STANDARD_PLAN.to_vec() }
fn default_phases() -> Vec<u64> { DEFAULT_PHASES.to_vec() }
fn default_threshold() -> u32 { DEFAULT_LEVEL_UP_THRESHOLD }
fn default_max_attempts() -> u32 { DEFAULT_MAX_ATTEMPTS }
fn default_backoff_unit_ms() -> u64 { 1_000 }
fn default_request_deadline_secs() -> u64 { 30 }
fn default_lock_wait_secs() -> u64 { 60 }
fn default_rate_limit_capacity() -> u32 { DEFAULT_CAPACITY }
fn default_rate_limit_refill() -> u32 { DEFAULT_REFILL_PER_SEC }
fn default_idempotency_window_secs() -> u64 { 300 }
fn default_scan_interval_secs() -> u64 { 300 }
// 400 USDT at 6 decimals
fn default_arbitrage_threshold() -> U256 { U256::from(400_000_000u64) }

fn de_u256<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<U256, D::Error> {
    let raw = AmountInput::deserialize(deserializer)?;
    raw.to_u256()
        .ok_or_else(|| serde::de::Error::custom(format!("not an integer amount: {:?}", raw)))
}

fn de_opt_u256<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<U256>, D::Error> {
    match Option::<AmountInput>::deserialize(deserializer)? {
        Some(raw) => raw
            .to_u256()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("not an integer amount: {:?}", raw))),
        None => Ok(None),
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            plan: default_plan(),
            phases: default_phases(),
            level_up_threshold: default_threshold(),
            max_attempts: default_max_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
            request_deadline_secs: default_request_deadline_secs(),
            lock_wait_secs: default_lock_wait_secs(),
            rate_limit_capacity: default_rate_limit_capacity(),
            rate_limit_refill_per_sec: default_rate_limit_refill(),
            idempotency_window_secs: default_idempotency_window_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            arbitrage_threshold: default_arbitrage_threshold(),
            min_donation: None,
            max_donation: None,
        }
    }
}

impl Tunables {
    /// Load tunables from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tunables: Self =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        tunables.validate()?;
        Ok(tunables)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.plan.is_empty(), "distribution plan must have at least one leg");
        for entry in &self.plan {
            ensure!(
                entry.percent <= 100,
                "{} leg has percentage {} > 100",
                entry.role,
                entry.percent
            );
        }
        let total: u64 = self.plan.iter().map(|e| e.percent).sum();
        ensure!(total <= 100, "distribution plan sums to {}%, more than the donation", total);
        if total != 100 {
            warn!("Distribution plan sums to {}%; {}% of each donation is not distributed", total, 100 - total);
        }

        ensure!(!self.phases.is_empty(), "phase table must not be empty");
        ensure!(self.level_up_threshold >= 1, "level_up_threshold must be at least 1");
        ensure!(self.max_attempts >= 1, "max_attempts must be at least 1");
        ensure!(self.request_deadline_secs >= 1, "request_deadline_secs must be at least 1");
        ensure!(self.rate_limit_capacity >= 1, "rate_limit_capacity must be at least 1");
        ensure!(self.rate_limit_refill_per_sec >= 1, "rate_limit_refill_per_sec must be at least 1");
        ensure!(self.scan_interval_secs >= 1, "scan_interval_secs must be at least 1");

        if let (Some(min), Some(max)) = (self.min_donation, self.max_donation) {
            ensure!(min <= max, "min_donation {} exceeds max_donation {}", min, max);
        }
        Ok(())
    }

    pub fn distribution_plan(&self) -> DistributionPlan {
        DistributionPlan::new(self.plan.clone())
    }

    pub fn progression_rules(&self) -> Result<ProgressionRules> {
        ProgressionRules::new(self.level_up_threshold, self.phases.clone())
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            max_attempts: self.max_attempts,
            request_deadline: self.request_deadline(),
            min_donation: self.min_donation,
            max_donation: self.max_donation,
        }
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn idempotency_window(&self) -> Duration {
        Duration::from_secs(self.idempotency_window_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

/// Full relay configuration
#[derive(Clone)]
pub struct RelayConfig {
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub private_key: Option<String>,
    pub pool_address: Address,
    pub operator_address: Address,
    pub donation_token: Option<Address>,
    pub pool_token: Option<Address>,
    pub redis_url: Option<String>,
    pub quote_api_url: String,
    pub quote_api_key: Option<String>,
    pub quote_sell_token: String,
    pub quote_buy_token: String,
    pub listen_addr: SocketAddr,
    pub tunables: Tunables,
}

// Keeps the signing key and API key out of logs
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("rpc_urls", &self.rpc_urls.len())
            .field("chain_id", &self.chain_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("pool_address", &self.pool_address)
            .field("operator_address", &self.operator_address)
            .field("donation_token", &self.donation_token)
            .field("pool_token", &self.pool_token)
            .field("redis", &self.redis_url.is_some())
            .field("quote_api_url", &self.quote_api_url)
            .field("quote_api_key", &self.quote_api_key.as_ref().map(|_| "<redacted>"))
            .field("listen_addr", &self.listen_addr)
            .field("tunables", &self.tunables)
            .finish()
    }
}

impl RelayConfig {
    /// Build from a variable lookup (process env in production)
    pub fn from_lookup<F>(get: F, tunables: Tunables) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| get(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let rpc_urls: Vec<String> = var("RPC_URLS")
            .context("RPC_URLS not set")?
            .split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if rpc_urls.is_empty() {
            bail!("RPC_URLS contains no endpoints");
        }

        let chain_id = match var("CHAIN_ID") {
            Some(raw) => raw.parse().with_context(|| format!("Invalid CHAIN_ID: {}", raw))?,
            None => DEFAULT_CHAIN_ID,
        };

        let address = |name: &'static str, field: &'static str| -> Result<Address> {
            let raw = var(name).with_context(|| format!("{} not set", name))?;
            parse_address(field, &raw).with_context(|| format!("Invalid {}", name))
        };
        let optional_address = |name: &'static str, field: &'static str| -> Result<Option<Address>> {
            var(name)
                .map(|raw| parse_address(field, &raw).with_context(|| format!("Invalid {}", name)))
                .transpose()
        };

        let pool_address = address("POOL_ADDRESS", "pool")?;
        let operator_address = address("OPERATOR_ADDRESS", "operator")?;
        let donation_token = optional_address("DONATION_TOKEN", "donation token")?;
        let pool_token = optional_address("POOL_TOKEN", "pool token")?;

        let listen_raw = var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = listen_raw
            .parse()
            .with_context(|| format!("Invalid LISTEN_ADDR: {}", listen_raw))?;

        let quote_sell_token = var("QUOTE_SELL_TOKEN").unwrap_or_else(|| {
            pool_token
                .map(|t| t.to_string())
                .unwrap_or_else(|| DEFAULT_QUOTE_TOKEN.to_string())
        });

        tunables.validate()?;

        Ok(Self {
            rpc_urls,
            chain_id,
            private_key: var("PRIVATE_KEY"),
            pool_address,
            operator_address,
            donation_token,
            pool_token,
            redis_url: var("REDIS_URL"),
            quote_api_url: var("QUOTE_API_URL").unwrap_or_else(|| DEFAULT_QUOTE_API_URL.to_string()),
            quote_api_key: var("QUOTE_API_KEY"),
            quote_sell_token,
            quote_buy_token: var("QUOTE_BUY_TOKEN").unwrap_or_else(|| DEFAULT_QUOTE_TOKEN.to_string()),
            listen_addr,
            tunables,
        })
    }

    pub fn donation_asset(&self) -> Asset {
        Asset::from_token(self.donation_token)
    }

    pub fn pool_asset(&self) -> Asset {
        Asset::from_token(self.pool_token)
    }
}

/// Load the env file (if present) and the optional TOML tunables
pub fn load_config_from_file(env_file: &str, tunables_file: Option<&Path>) -> Result<RelayConfig> {
    match dotenv::from_filename(env_file) {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(_) => warn!("{} not found, using process environment only", env_file),
    }

    let tunables = match tunables_file {
        Some(path) => {
            let t = Tunables::load(path)?;
            info!("Tunables loaded from {}", path.display());
            t
        }
        None => Tunables::default(),
    };

    RelayConfig::from_lookup(|name| std::env::var(name).ok(), tunables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecipientRole;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn base_env() -> HashMap<String, String> {
        env(&[
            ("RPC_URLS", "https://polygon-rpc.com, https://rpc.ankr.com/polygon"),
            ("POOL_ADDRESS", "0xa477E1a3F20E0fE460d1fb48cD8323248D3C42DD"),
            ("OPERATOR_ADDRESS", "0x70f64A79620d35aC2f42Ae755B9776Ac736D1200"),
            ("POOL_TOKEN", "0xc2132D05D31c914a87C6611C10748AEb04B58e8F"),
        ])
    }

    #[test]
    fn test_defaults_from_minimal_env() {
        let mut vars = base_env();
        vars.insert("PRIVATE_KEY".into(), "0xfeedfacefeedface".into());
        let config = RelayConfig::from_lookup(|k| vars.get(k).cloned(), Tunables::default()).unwrap();

        assert_eq!(config.rpc_urls.len(), 2);
        assert_eq!(config.chain_id, 137);
        assert_eq!(config.donation_asset(), Asset::Native);
        assert!(matches!(config.pool_asset(), Asset::Token(_)));
        assert_eq!(
            config.quote_sell_token.to_lowercase(),
            "0xc2132d05d31c914a87c6611c10748aeb04b58e8f"
        );
        assert_eq!(config.quote_buy_token, "MATIC");
        assert_eq!(config.quote_api_url, DEFAULT_QUOTE_API_URL);
        assert!(config.redis_url.is_none());
        assert!(!format!("{:?}", config).contains("feedface"));
    }

    #[test]
    fn test_rejects_malformed_operator() {
        let mut vars = base_env();
        vars.insert("OPERATOR_ADDRESS".into(), "0x70f64A79".into());
        let err = RelayConfig::from_lookup(|k| vars.get(k).cloned(), Tunables::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("OPERATOR_ADDRESS"));
    }

    #[test]
    fn test_missing_rpc_urls() {
        let mut vars = base_env();
        vars.insert("RPC_URLS".into(), " , ".into());
        assert!(RelayConfig::from_lookup(|k| vars.get(k).cloned(), Tunables::default()).is_err());
    }

    #[test]
    fn test_empty_toml_is_standard_relay() {
        let t = Tunables::parse("").unwrap();
        assert_eq!(t.distribution_plan(), DistributionPlan::standard());
        assert_eq!(t.phases, vec![20, 80, 320, 1280, 5120, 20480]);
        assert_eq!(t.level_up_threshold, 10);
        assert_eq!(t.max_attempts, 3);
        assert_eq!(t.request_deadline(), Duration::from_secs(30));
        assert_eq!(t.idempotency_window(), Duration::from_secs(300));
        assert_eq!(t.scan_interval(), Duration::from_secs(300));
        assert_eq!(t.rate_limit_capacity, 10);
    }

    #[test]
    fn test_toml_overrides() {
        let t = Tunables::parse(
            r#"
            max_attempts = 5
            arbitrage_threshold = "400000000000000000000"
            min_donation = 20000000000000000

            [[plan]]
            role = "sender"
            percent = 60

            [[plan]]
            role = "pool"
            percent = 40
            "#,
        )
        .unwrap();

        assert_eq!(t.max_attempts, 5);
        assert_eq!(
            t.arbitrage_threshold,
            "400000000000000000000".parse::<U256>().unwrap()
        );
        assert_eq!(t.min_donation, Some(U256::from(20_000_000_000_000_000u64)));
        assert_eq!(t.max_donation, None);
        assert_eq!(t.plan.len(), 2);
        assert_eq!(t.plan[1].role, RecipientRole::Pool);
    }

    #[test]
    fn test_validation_rejects_bad_tunables() {
        assert!(Tunables::parse("phases = []").is_err());
        assert!(Tunables::parse("level_up_threshold = 0").is_err());
        assert!(Tunables::parse("max_attempts = 0").is_err());
        assert!(Tunables::parse("[[plan]]\nrole = \"sender\"\npercent = 101").is_err());
        assert!(Tunables::parse("min_donation = 10\nmax_donation = 5").is_err());
    }
}
