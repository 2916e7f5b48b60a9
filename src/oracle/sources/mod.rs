//! Price source adapters
//!
//! An adapter turns a symbol list into prices. The host only needs
//! `fetch_prices`, `state` and a liveness `ping`; how the adapter is reached
//! (subprocess, in-process) is up to the implementation.

mod process;
mod sampler;

pub use process::{AdapterReply, AdapterRequest, ProcessAdapter};
pub use sampler::{Sampler, SamplerConfig};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PriceSample, Symbol};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to start adapter: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("adapter i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("adapter did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("adapter protocol error: {0}")]
    Protocol(String),
    #[error("adapter returned error: {0}")]
    Remote(String),
    #[error("adapter disconnected")]
    Disconnected,
}

/// Version and symbol coverage reported during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterState {
    pub version: String,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

/// Price as reported by an adapter, before the host stamps it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPrice {
    pub symbol: Symbol,
    pub price: Decimal,
    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl AdapterPrice {
    pub fn into_sample(self, timestamp: i64) -> PriceSample {
        PriceSample {
            timestamp,
            symbol: self.symbol,
            price: self.price,
            volume: self.volume,
        }
    }
}

/// Result of one `fetch_prices` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPrices {
    pub prices: Vec<AdapterPrice>,
    /// Symbols the adapter does not recognize
    #[serde(default)]
    pub bad_symbols: Vec<Symbol>,
}

/// Capability every data-source adapter provides
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceAdapter: Send + Sync {
    async fn fetch_prices(&self, symbols: &[Symbol]) -> Result<FetchedPrices, AdapterError>;

    async fn state(&self) -> Result<AdapterState, AdapterError>;

    /// Liveness check
    async fn ping(&self) -> Result<(), AdapterError> {
        self.state().await.map(|_| ())
    }
}
