//! Oracle Aggregator - Combines price samples into one representative price
//!
//! Pure functions over decimal prices: median, mean and volume-weighted
//! average. `AggregationMethod` selects which one the price feed applies
//! when several providers report the same symbol.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("no prices to aggregate")]
    EmptyInput,
    #[error("got {prices} prices but {volumes} volumes")]
    LengthMismatch { prices: usize, volumes: usize },
    #[error("total volume is zero")]
    ZeroVolume,
    #[error("negative volume {0}")]
    NegativeVolume(Decimal),
    #[error("arithmetic overflow while aggregating")]
    Overflow,
}

impl AggregationError {
    /// Errors meaning "no usable data" as opposed to malformed input
    ///
    /// Overflow counts: volumes in raw base units can exceed the decimal
    /// range, the prices themselves are still usable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::ZeroVolume | Self::Overflow)
    }
}

/// Aggregation function applied across providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    /// Volume-weighted average, median when volumes are missing
    Vwap,
    Median,
    Mean,
}

impl Default for AggregationMethod {
    fn default() -> Self {
        AggregationMethod::Vwap
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMethod::Vwap => write!(f, "vwap"),
            AggregationMethod::Median => write!(f, "median"),
            AggregationMethod::Mean => write!(f, "mean"),
        }
    }
}

/// Returns the sorted middle, or the average of the two middle items when
/// the input has an even number of elements.
pub fn median(prices: &[Decimal]) -> Result<Decimal, AggregationError> {
    if prices.is_empty() {
        return Err(AggregationError::EmptyInput);
    }

    let mut sorted = prices.to_vec();
    sorted.sort_unstable();

    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        sorted[middle - 1]
            .checked_add(sorted[middle])
            .and_then(|sum| sum.checked_div(Decimal::TWO))
            .ok_or(AggregationError::Overflow)
    } else {
        Ok(sorted[middle])
    }
}

/// Arithmetic mean
pub fn mean(prices: &[Decimal]) -> Result<Decimal, AggregationError> {
    match prices {
        [] => Err(AggregationError::EmptyInput),
        [single] => Ok(*single),
        _ => {
            let sum = prices
                .iter()
                .try_fold(Decimal::ZERO, |acc, price| acc.checked_add(*price))
                .ok_or(AggregationError::Overflow)?;
            sum.checked_div(Decimal::from(prices.len()))
                .ok_or(AggregationError::Overflow)
        }
    }
}

/// Volume-weighted average price
///
/// Returns `(vwap, highest_volume)`. The highest single volume is a rough
/// liquidity signal for callers.
pub fn vwap(prices: &[Decimal], volumes: &[Decimal]) -> Result<(Decimal, Decimal), AggregationError> {
    if prices.len() != volumes.len() {
        return Err(AggregationError::LengthMismatch {
            prices: prices.len(),
            volumes: volumes.len(),
        });
    }
    if prices.is_empty() {
        return Err(AggregationError::EmptyInput);
    }

    let mut weighted = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;
    let mut highest_volume = Decimal::ZERO;

    for (price, volume) in prices.iter().zip(volumes) {
        if volume.is_sign_negative() && !volume.is_zero() {
            return Err(AggregationError::NegativeVolume(*volume));
        }
        weighted = price
            .checked_mul(*volume)
            .and_then(|product| weighted.checked_add(product))
            .ok_or(AggregationError::Overflow)?;
        total_volume = total_volume
            .checked_add(*volume)
            .ok_or(AggregationError::Overflow)?;
        highest_volume = highest_volume.max(*volume);
    }

    if total_volume.is_zero() {
        return Err(AggregationError::ZeroVolume);
    }

    let price = weighted
        .checked_div(total_volume)
        .ok_or(AggregationError::Overflow)?;
    Ok((price, highest_volume))
}
