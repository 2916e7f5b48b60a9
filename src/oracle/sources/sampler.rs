//! Sampler - Periodically pulls prices from one adapter into its cache
//!
//! Timestamps are stamped here, at receipt, not by the adapter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{AdapterError, PriceAdapter};
use crate::oracle::{SampleCache, SymbolRegistry};
use crate::types::PriceSample;

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// How often prices are fetched
    pub interval: Duration,
    /// How often the cache is trimmed and the adapter pinged
    pub gc_interval: Duration,
    /// Samples younger than this survive GC (latest per symbol always does)
    pub retention_secs: i64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            gc_interval: Duration::from_secs(60),
            retention_secs: 0,
        }
    }
}

pub struct Sampler {
    adapter: Arc<dyn PriceAdapter>,
    cache: Arc<SampleCache>,
    symbols: Arc<SymbolRegistry>,
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(
        adapter: Arc<dyn PriceAdapter>,
        cache: Arc<SampleCache>,
        symbols: Arc<SymbolRegistry>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            adapter,
            cache,
            symbols,
            config,
        }
    }

    /// Fetch the current symbol set once and store the result
    pub async fn sample_once(&self) -> Result<usize, AdapterError> {
        let symbols = self.symbols.snapshot();
        if symbols.is_empty() {
            return Ok(0);
        }

        let fetched = self.adapter.fetch_prices(&symbols).await?;
        let timestamp = Utc::now().timestamp();

        if !fetched.bad_symbols.is_empty() {
            debug!(
                provider = %self.cache.provider(),
                symbols = ?fetched.bad_symbols,
                "adapter does not recognize symbols"
            );
        }

        let samples: Vec<PriceSample> = fetched
            .prices
            .into_iter()
            .map(|price| price.into_sample(timestamp))
            .collect();
        self.cache.add_samples(&samples, timestamp);

        Ok(samples.len())
    }

    /// Trim the cache and check the adapter is alive
    pub async fn maintain(&self) {
        let keep_after = Utc::now().timestamp() - self.config.retention_secs.max(0);
        let removed = self.cache.gc_samples(keep_after);
        if removed > 0 {
            debug!(provider = %self.cache.provider(), removed, "sample cache trimmed");
        }

        if let Err(e) = self.adapter.ping().await {
            warn!(provider = %self.cache.provider(), error = %e, "adapter ping failed");
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.adapter.state().await {
            Ok(state) => info!(
                provider = %self.cache.provider(),
                version = %state.version,
                supported = state.symbols.len(),
                "sampler started"
            ),
            Err(e) => warn!(
                provider = %self.cache.provider(),
                error = %e,
                "adapter handshake failed, will retry on next sample"
            ),
        }

        let mut sample_tick = interval(self.config.interval);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut gc_tick = interval_at(Instant::now() + self.config.gc_interval, self.config.gc_interval);
        gc_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = sample_tick.tick() => {
                    if let Err(e) = self.sample_once().await {
                        warn!(provider = %self.cache.provider(), error = %e, "sampling failed");
                    }
                }
                _ = gc_tick.tick() => self.maintain().await,
                _ = shutdown.changed() => break,
            }
        }

        info!(provider = %self.cache.provider(), "sampler stopped");
    }
}
