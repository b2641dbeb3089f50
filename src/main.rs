//! Donation Relay
//!
//! HTTP service accepting donations and splitting each across sender, pool,
//! operator and sponsor, plus the periodic arbitrage scan of the pool.
//!
//! Startup:
//! - Load env file (secrets, addresses) and optional TOML tunables
//! - Connect to the first responsive RPC endpoint (or dry-run gateway)
//! - Connect Redis for the idempotency store (in-memory when unset)
//! - Spawn the arbitrage scheduler, then serve HTTP until SIGINT/SIGTERM
//!
//! Created: 2026-10-19
//!
//! Usage:
//!   donation-relay --env-file .env.polygon --config relay.toml
//!   donation-relay --dry-run --log-json

use anyhow::{Context, Result};
use clap::Parser;
use donation_relay::admission::{IdempotencyGuard, MemoryTtlStore, RateLimiter, RedisTtlStore, TtlStore};
use donation_relay::chain::{ChainGateway, DryRunGateway, RpcChainGateway};
use donation_relay::clock::{Clock, MonotonicClock};
use donation_relay::config::load_config_from_file;
use donation_relay::distribution::{DistributionLock, FundDistributor, RoutingAddresses};
use donation_relay::ledger::InMemoryLedger;
use donation_relay::processor::{DonationProcessor, LinearBackoff};
use donation_relay::quote::{LoggingTradeSink, ZeroExQuoter};
use donation_relay::scheduler::{ArbitrageScheduler, ArbitrageSettings};
use donation_relay::server::create_router;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Expired in-memory idempotency keys are purged this often
const TTL_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Donation relay service
#[derive(Parser)]
#[command(name = "donation-relay")]
struct Args {
    /// Env file with secrets and addresses
    #[arg(long, env = "RELAY_ENV_FILE", default_value = ".env")]
    env_file: String,

    /// TOML file with tunables (plan, phases, limits, timings)
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Log transfers instead of sending them
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    info!("Donation relay starting...");

    let config = load_config_from_file(&args.env_file, args.config.as_deref())?;
    let tunables = &config.tunables;
    info!("Chain id: {} | RPC endpoints: {}", config.chain_id, config.rpc_urls.len());
    info!("Pool: {} | Operator: {}", config.pool_address, config.operator_address);
    info!("Donation asset: {} | Pool asset: {}", config.donation_asset(), config.pool_asset());
    info!(
        "Plan: {} legs, {}% distributed | phases: {} | level-up every {} donations",
        tunables.plan.len(),
        tunables.plan.iter().map(|e| e.percent).sum::<u64>(),
        tunables.phases.len(),
        tunables.level_up_threshold
    );

    let gateway: Arc<dyn ChainGateway> = if args.dry_run {
        warn!("DRY RUN: no transfers will be sent");
        Arc::new(DryRunGateway)
    } else {
        let key = config
            .private_key
            .as_deref()
            .context("PRIVATE_KEY not set (use --dry-run to run without one)")?;
        Arc::new(RpcChainGateway::connect(&config.rpc_urls, key, config.chain_id).await?)
    };

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store: Arc<dyn TtlStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisTtlStore::connect(url).await?),
        None => {
            warn!("REDIS_URL not set, idempotency keys kept in memory (single instance only)");
            let memory = Arc::new(MemoryTtlStore::new(clock.clone()));
            let purge = memory.clone();
            let mut stop = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(TTL_PURGE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => { purge.purge_expired(); }
                        _ = stop.changed() => break,
                    }
                }
            });
            memory
        }
    };

    let lock = Arc::new(DistributionLock::new());

    let distributor = FundDistributor::new(
        gateway.clone(),
        lock.clone(),
        tunables.distribution_plan(),
        RoutingAddresses {
            pool: config.pool_address.to_string(),
            operator: config.operator_address.to_string(),
        },
        config.donation_asset(),
        tunables.lock_wait(),
    );

    let processor = Arc::new(DonationProcessor::new(
        Arc::new(RateLimiter::new(
            tunables.rate_limit_capacity,
            tunables.rate_limit_refill_per_sec,
            clock.clone(),
        )),
        IdempotencyGuard::new(store, tunables.idempotency_window()),
        distributor,
        Arc::new(InMemoryLedger::new(tunables.progression_rules()?)),
        Arc::new(LinearBackoff::new(tunables.backoff_unit())),
        tunables.processor_settings(),
    ));

    let scheduler = ArbitrageScheduler::new(
        gateway,
        Arc::new(ZeroExQuoter::new(
            config.quote_api_url.clone(),
            config.quote_api_key.clone(),
            tunables.request_deadline(),
        )?),
        Arc::new(LoggingTradeSink),
        lock,
        ArbitrageSettings {
            interval: tunables.scan_interval(),
            threshold: tunables.arbitrage_threshold,
            pool_address: config.pool_address,
            pool_asset: config.pool_asset(),
            sell_token: config.quote_sell_token.clone(),
            buy_token: config.quote_buy_token.clone(),
            call_timeout: tunables.request_deadline(),
        },
    );
    let scheduler_rx = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_rx).await });

    // SIGINT/SIGTERM flip the shutdown flag
    let signals = Signals::new([SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();
    tokio::spawn(async move {
        let mut signals = signals;
        if let Some(sig) = signals.next().await {
            info!("Received signal {}, shutting down", sig);
            let _ = shutdown_tx.send(true);
        }
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Listening on http://{}", config.listen_addr);

    axum::serve(listener, create_router(processor))
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .context("HTTP server failed")?;

    signals_handle.close();
    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    info!("Donation relay stopped");
    Ok(())
}
