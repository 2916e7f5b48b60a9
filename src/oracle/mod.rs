//! Oracle module - Price collection and aggregation
//!
//! Adapters feed per-provider sample caches; the price feed resolves one
//! aggregated price per symbol on demand for the reporter and the API.

pub mod aggregator;
mod feed;
mod sample_cache;
pub mod sources;

pub use aggregator::{AggregationError, AggregationMethod};
pub use feed::{AggregationConfig, PriceFeed, SymbolRegistry};
pub use sample_cache::{SampleCache, DEFAULT_MAX_SAMPLES_PER_SYMBOL};
