//! Core types used throughout the reporter
//!
//! Defines price samples, votes and symbol helpers shared by the price
//! pipeline and the reporting engine.

use ethers::types::{H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Trading pair symbol as published by the oracle contract (e.g. "ETH-USD")
pub type Symbol = String;

/// One observed price for a symbol
///
/// Samples are immutable once created. `timestamp` is unix seconds, stamped by
/// the host when the adapter reply was received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: i64,
    pub symbol: Symbol,
    pub price: Decimal,
    /// Traded volume behind the price, `None` when the source reports none
    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl PriceSample {
    pub fn new(symbol: impl Into<Symbol>, price: Decimal, timestamp: i64) -> Self {
        Self {
            timestamp,
            symbol: symbol.into(),
            price,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }
}

impl fmt::Display for PriceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.volume {
            Some(volume) => write!(
                f,
                "{}@{} (vol {}, ts {})",
                self.symbol, self.price, volume, self.timestamp
            ),
            None => write!(f, "{}@{} (ts {})", self.symbol, self.price, self.timestamp),
        }
    }
}

/// Arguments of a single `vote` transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Commitment for the current round, zero for reveal-only votes
    pub commit: H256,
    /// Scaled prices revealing the previous round's commitment
    pub reports: Vec<U256>,
    /// Salt of the previous round, or the invalid-price sentinel
    pub salt: U256,
}

impl Vote {
    pub fn is_reveal_only(&self) -> bool {
        self.commit.is_zero()
    }
}

/// Returns the first symbol that appears more than once, if any
pub fn first_duplicate(symbols: &[Symbol]) -> Option<&Symbol> {
    let mut seen = HashSet::with_capacity(symbols.len());
    symbols.iter().find(|s| !seen.insert(s.as_str()))
}

/// Appends `extra` to `base`, skipping symbols already present, keeping order
pub fn merge_symbols(base: &mut Vec<Symbol>, extra: &[Symbol]) {
    for symbol in extra {
        if !base.contains(symbol) {
            base.push(symbol.clone());
        }
    }
}
