//! Sample Cache - Time-indexed price samples for one provider
//!
//! Stores at most one sample per (symbol, timestamp) and answers "closest
//! sample to T" queries. Memory is bounded per symbol; `gc_samples` trims
//! history while always keeping the latest sample of every symbol.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::types::PriceSample;

/// Default upper bound of samples retained per symbol
pub const DEFAULT_MAX_SAMPLES_PER_SYMBOL: usize = 600;

pub struct SampleCache {
    provider: String,
    max_per_symbol: usize,
    samples: RwLock<HashMap<String, BTreeMap<i64, PriceSample>>>,
}

impl SampleCache {
    pub fn new(provider: impl Into<String>) -> Self {
        Self::with_capacity(provider, DEFAULT_MAX_SAMPLES_PER_SYMBOL)
    }

    pub fn with_capacity(provider: impl Into<String>, max_per_symbol: usize) -> Self {
        Self {
            provider: provider.into(),
            max_per_symbol: max_per_symbol.max(1),
            samples: RwLock::new(HashMap::new()),
        }
    }

    /// Name of the provider feeding this cache
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Insert samples under `timestamp`, overwriting any sample already there
    pub fn add_samples(&self, samples: &[PriceSample], timestamp: i64) {
        let Ok(mut cache) = self.samples.write() else {
            tracing::error!(provider = %self.provider, "sample cache lock poisoned");
            return;
        };

        for sample in samples {
            let series = cache.entry(sample.symbol.clone()).or_default();
            let mut stored = sample.clone();
            stored.timestamp = timestamp;
            series.insert(timestamp, stored);

            while series.len() > self.max_per_symbol {
                series.pop_first();
            }
        }
    }

    /// Sample closest to `target` by absolute distance
    ///
    /// An exact match is returned as-is. On equal distance the sample with
    /// the smaller timestamp wins.
    pub fn get_sample(&self, symbol: &str, target: i64) -> Option<PriceSample> {
        let cache = self.samples.read().ok()?;
        let series = cache.get(symbol)?;

        let before = series.range(..=target).next_back();
        let after = series.range(target..).next();

        let nearest = match (before, after) {
            (Some((ts_before, before)), Some((ts_after, after))) => {
                if target.abs_diff(*ts_after) < target.abs_diff(*ts_before) {
                    after
                } else {
                    before
                }
            }
            (Some((_, sample)), None) | (None, Some((_, sample))) => sample,
            (None, None) => return None,
        };

        Some(nearest.clone())
    }

    /// Most recent sample of `symbol`
    pub fn latest(&self, symbol: &str) -> Option<PriceSample> {
        let cache = self.samples.read().ok()?;
        cache
            .get(symbol)?
            .last_key_value()
            .map(|(_, sample)| sample.clone())
    }

    /// Drop samples older than `keep_after`, keeping the latest per symbol
    ///
    /// Returns the number of samples removed.
    pub fn gc_samples(&self, keep_after: i64) -> usize {
        let Ok(mut cache) = self.samples.write() else {
            return 0;
        };

        let mut removed = 0;
        for series in cache.values_mut() {
            let Some(latest) = series.keys().next_back().copied() else {
                continue;
            };
            let cutoff = keep_after.min(latest);
            let kept = series.split_off(&cutoff);
            removed += series.len();
            *series = kept;
        }
        cache.retain(|_, series| !series.is_empty());

        removed
    }

    /// Total number of samples across all symbols
    pub fn len(&self) -> usize {
        self.samples
            .read()
            .map(|cache| cache.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
