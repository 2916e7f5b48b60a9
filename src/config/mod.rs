//! Configuration management for the reporter
//!
//! Loads from optional config files + environment variables via .env

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use ethers::types::Address;
use serde::Deserialize;

use crate::oracle::sources::SamplerConfig;
use crate::oracle::{AggregationConfig, DEFAULT_MAX_SAMPLES_PER_SYMBOL};
use crate::reporter::commitment::MAX_PRECISION_DECIMALS;
use crate::reporter::ReporterConfig;

/// Environment variable holding the reporter's signing key
pub const PRIVATE_KEY_ENV: &str = "ORACLE_PRIVATE_KEY";

/// Oracle contract address on Autonity networks
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x47e9Fbef8C83A1714F1951F142132E6e90F5fa5D";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub reporter: ReporterSection,
    pub sampling: SamplingSection,
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
    /// Symbols sampled in addition to the contract's list
    #[serde(default)]
    pub symbols: Vec<String>,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReporterSection {
    /// WebSocket endpoint of the node
    pub ws_url: String,
    /// Oracle contract address
    pub contract_address: String,
    /// Seconds between connectivity health checks
    pub health_check_interval_secs: u64,
    /// Rounds kept in the ledger
    pub round_retention: u64,
    /// Decimal places of the on-chain fixed-point price
    pub price_precision_decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingSection {
    /// Seconds between adapter fetches
    pub interval_secs: u64,
    /// Seconds between cache GC runs
    pub gc_interval_secs: u64,
    /// Samples younger than this survive GC
    pub retention_secs: i64,
    /// Hard cap of samples per provider and symbol
    pub max_samples_per_symbol: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Provider name, also used in logs
    pub name: String,
    /// Executable speaking the adapter protocol
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_adapter_timeout")]
    pub timeout_secs: u64,
}

fn default_adapter_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_builder(
            Config::builder()
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                // Override with environment variables (ORACLE__*)
                .add_source(Environment::with_prefix("ORACLE").separator("__")),
        )
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder
            // Reporter defaults
            .set_default("reporter.ws_url", "ws://127.0.0.1:8546")?
            .set_default("reporter.contract_address", DEFAULT_CONTRACT_ADDRESS)?
            .set_default("reporter.health_check_interval_secs", 120)?
            .set_default("reporter.round_retention", 10)?
            .set_default("reporter.price_precision_decimals", 7)?
            // Sampling defaults
            .set_default("sampling.interval_secs", 10)?
            .set_default("sampling.gc_interval_secs", 60)?
            .set_default("sampling.retention_secs", 0)?
            .set_default("sampling.max_samples_per_symbol", DEFAULT_MAX_SAMPLES_PER_SYMBOL as u64)?
            // Aggregation defaults
            .set_default("aggregation.method", "vwap")?
            .set_default("aggregation.max_sample_age_secs", 60)?
            // API defaults
            .set_default("api.enabled", false)?
            .set_default("api.listen_addr", "127.0.0.1:30311")?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    fn validate(&self) -> Result<()> {
        if self.reporter.price_precision_decimals > MAX_PRECISION_DECIMALS {
            bail!(
                "reporter.price_precision_decimals must be at most {}",
                MAX_PRECISION_DECIMALS
            );
        }
        if self.reporter.health_check_interval_secs == 0 {
            bail!("reporter.health_check_interval_secs must be positive");
        }
        if self.sampling.interval_secs == 0 || self.sampling.gc_interval_secs == 0 {
            bail!("sampling intervals must be positive");
        }
        self.contract_address()?;
        Ok(())
    }

    pub fn contract_address(&self) -> Result<Address> {
        self.reporter
            .contract_address
            .parse()
            .with_context(|| format!("Invalid contract address '{}'", self.reporter.contract_address))
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        self.api
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid api.listen_addr '{}'", self.api.listen_addr))
    }

    /// Engine parameters for the given signing identity
    pub fn reporter_config(&self, identity: Address) -> ReporterConfig {
        ReporterConfig {
            identity,
            health_check_interval: Duration::from_secs(self.reporter.health_check_interval_secs),
            round_retention: self.reporter.round_retention,
            price_decimals: self.reporter.price_precision_decimals,
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_secs(self.sampling.interval_secs),
            gc_interval: Duration::from_secs(self.sampling.gc_interval_secs),
            retention_secs: self.sampling.retention_secs,
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "ws_url={} contract={} adapters={:?} aggregation={} precision={} retention={}",
            self.reporter.ws_url,
            self.reporter.contract_address,
            self.adapters.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            self.aggregation.method,
            self.reporter.price_precision_decimals,
            self.reporter.round_retention,
        )
    }

    /// Read and validate the signing key from the environment
    pub fn private_key() -> Result<String> {
        let pk = std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("Required environment variable {} is not set", PRIVATE_KEY_ENV))?;
        validate_private_key(&pk)?;
        Ok(pk)
    }
}

fn validate_private_key(pk: &str) -> Result<()> {
    let Some(hex_part) = pk.strip_prefix("0x") else {
        bail!("{} must be a hex string with 0x prefix", PRIVATE_KEY_ENV);
    };
    if hex_part.len() != 64 || hex::decode(hex_part).is_err() {
        bail!("{} must hold 32 hex-encoded bytes", PRIVATE_KEY_ENV);
    }
    Ok(())
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
