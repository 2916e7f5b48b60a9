//! Price Feed - Resolves one price per symbol across all providers
//!
//! For each symbol the sample nearest to the target time is taken from every
//! provider cache, stale samples are discarded, and the remaining ones are
//! aggregated with the configured method.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::Deserialize;

use super::aggregator::{self, AggregationError, AggregationMethod};
use super::sample_cache::SampleCache;
use crate::types::{merge_symbols, PriceSample, Symbol};

/// Aggregation parameters, set once at startup
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    pub method: AggregationMethod,
    /// Samples further than this from the target time are ignored
    pub max_sample_age_secs: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            method: AggregationMethod::Vwap,
            max_sample_age_secs: 60,
        }
    }
}

pub struct PriceFeed {
    config: AggregationConfig,
    providers: Vec<Arc<SampleCache>>,
}

impl PriceFeed {
    pub fn new(config: AggregationConfig, providers: Vec<Arc<SampleCache>>) -> Self {
        Self { config, providers }
    }

    /// Aggregated price of `symbol` around `target`
    pub fn aggregate_price(&self, symbol: &str, target: i64) -> Result<PriceSample, AggregationError> {
        let max_age = self.config.max_sample_age_secs.max(0).unsigned_abs();
        let samples: Vec<PriceSample> = self
            .providers
            .iter()
            .filter_map(|cache| cache.get_sample(symbol, target))
            .filter(|sample| sample.timestamp.abs_diff(target) <= max_age)
            .collect();

        match samples.as_slice() {
            [] => Err(AggregationError::EmptyInput),
            [single] => Ok(single.clone()),
            _ => self.combine(symbol, target, &samples),
        }
    }

    fn combine(
        &self,
        symbol: &str,
        target: i64,
        samples: &[PriceSample],
    ) -> Result<PriceSample, AggregationError> {
        let prices: Vec<Decimal> = samples.iter().map(|s| s.price).collect();
        let volumes: Option<Vec<Decimal>> = samples.iter().map(|s| s.volume).collect();

        let (price, volume) = match self.config.method {
            AggregationMethod::Vwap => match volumes.as_deref().map(|v| aggregator::vwap(&prices, v)) {
                Some(Ok((price, _highest))) => (
                    price,
                    volumes.and_then(|v| {
                        v.iter()
                            .try_fold(Decimal::ZERO, |acc, volume| acc.checked_add(*volume))
                    }),
                ),
                Some(Err(e)) if e.is_unavailable() => (aggregator::median(&prices)?, None),
                None => (aggregator::median(&prices)?, None),
                Some(Err(e)) => return Err(e),
            },
            AggregationMethod::Median => (aggregator::median(&prices)?, None),
            AggregationMethod::Mean => (aggregator::mean(&prices)?, None),
        };

        Ok(PriceSample {
            timestamp: target,
            symbol: symbol.to_string(),
            price,
            volume,
        })
    }

    /// Aggregated prices for `symbols`; unresolvable symbols are omitted
    pub fn prices_for(&self, symbols: &[Symbol], target: i64) -> HashMap<Symbol, PriceSample> {
        let mut prices = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            match self.aggregate_price(symbol, target) {
                Ok(sample) => {
                    prices.insert(symbol.clone(), sample);
                }
                Err(e) => {
                    tracing::debug!(symbol = %symbol, target, error = %e, "no price available");
                }
            }
        }
        prices
    }
}

/// Symbols the samplers collect prices for
///
/// The chain's list is replaced wholesale on every symbol update, operator
/// additions persist across updates.
#[derive(Default)]
pub struct SymbolRegistry {
    chain: RwLock<Vec<Symbol>>,
    extra: RwLock<Vec<Symbol>>,
}

impl SymbolRegistry {
    pub fn new(extra: Vec<Symbol>) -> Self {
        let mut deduped = Vec::with_capacity(extra.len());
        merge_symbols(&mut deduped, &extra);
        Self {
            chain: RwLock::new(Vec::new()),
            extra: RwLock::new(deduped),
        }
    }

    pub fn set_chain_symbols(&self, symbols: Vec<Symbol>) {
        if let Ok(mut chain) = self.chain.write() {
            *chain = symbols;
        }
    }

    pub fn add_symbols(&self, symbols: &[Symbol]) {
        if let Ok(mut extra) = self.extra.write() {
            merge_symbols(&mut extra, symbols);
        }
    }

    pub fn chain_symbols(&self) -> Vec<Symbol> {
        self.chain.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Chain symbols followed by operator additions, without duplicates
    pub fn snapshot(&self) -> Vec<Symbol> {
        let mut symbols = self.chain_symbols();
        if let Ok(extra) = self.extra.read() {
            merge_symbols(&mut symbols, &extra);
        }
        symbols
    }
}
