//! Oracle reporter daemon
//!
//! Starts one sampler per configured adapter, connects the reporter to the
//! oracle contract and runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oracle_reporter::chain::EthersConnector;
use oracle_reporter::config::{AppConfig, LoggingConfig};
use oracle_reporter::oracle::sources::{PriceAdapter, ProcessAdapter, Sampler};
use oracle_reporter::oracle::{PriceFeed, SampleCache, SymbolRegistry};
use oracle_reporter::reporter::Reporter;

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), config = %config, "starting oracle reporter");

    let wallet: LocalWallet = AppConfig::private_key()?
        .parse()
        .context("Failed to parse signing key")?;
    let identity = wallet.address();
    info!(identity = ?identity, "signing key loaded");

    if config.adapters.is_empty() {
        warn!("no price adapters configured, every round will lack prices");
    }

    let symbols = Arc::new(SymbolRegistry::new(config.symbols.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut adapters = Vec::with_capacity(config.adapters.len());
    let mut caches = Vec::with_capacity(config.adapters.len());
    let mut tasks = Vec::new();

    for adapter_config in &config.adapters {
        let adapter = Arc::new(ProcessAdapter::new(
            adapter_config.name.clone(),
            adapter_config.command.clone(),
            adapter_config.args.clone(),
            Duration::from_secs(adapter_config.timeout_secs),
        ));
        let cache = Arc::new(SampleCache::with_capacity(
            adapter_config.name.clone(),
            config.sampling.max_samples_per_symbol,
        ));

        let sampler = Sampler::new(
            adapter.clone() as Arc<dyn PriceAdapter>,
            cache.clone(),
            symbols.clone(),
            config.sampler_config(),
        );
        tasks.push(tokio::spawn(sampler.run(shutdown_rx.clone())));

        adapters.push(adapter);
        caches.push(cache);
    }

    let feed = Arc::new(PriceFeed::new(config.aggregation.clone(), caches));

    #[cfg(feature = "api")]
    if config.api.enabled {
        let addr = config.api_addr()?;
        let state = Arc::new(oracle_reporter::api::ApiState::new(
            feed.clone(),
            symbols.clone(),
            adapters.clone(),
        ));
        let api_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = oracle_reporter::api::serve(addr, state, api_shutdown).await {
                error!(error = %e, "control API stopped");
            }
        }));
    }

    #[cfg(not(feature = "api"))]
    if config.api.enabled {
        warn!("api.enabled is set but the binary was built without the `api` feature");
    }

    let connector = Arc::new(EthersConnector::new(
        config.reporter.ws_url.clone(),
        config.contract_address()?,
        wallet,
    ));
    let reporter = Reporter::connect(config.reporter_config(identity), connector, feed, symbols)
        .await
        .context("Failed to connect to the oracle contract")?;
    tasks.push(tokio::spawn(reporter.run(shutdown_rx)));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "task panicked during shutdown");
        }
    }
    for adapter in &adapters {
        adapter.shutdown().await;
    }

    info!("oracle reporter stopped");
    Ok(())
}
