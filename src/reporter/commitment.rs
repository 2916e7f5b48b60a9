//! Commitment encoding
//!
//! `commit = keccak256(report_0 ‖ report_1 ‖ … ‖ report_n ‖ salt)` where every
//! field is a 32-byte big-endian (left-padded) word and reports follow the
//! contract's symbol order. The verifying contract recomputes this layout
//! bit for bit.

use std::collections::HashMap;

use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use rand::rngs::OsRng;
use rand::RngCore;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::types::{PriceSample, Symbol};

/// Largest decimal scale the price factor may use
pub const MAX_PRECISION_DECIMALS: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    #[error("negative price {price} for {symbol}")]
    NegativePrice { symbol: Symbol, price: Decimal },
    #[error("price {price} for {symbol} overflows the on-chain representation")]
    Overflow { symbol: Symbol, price: Decimal },
}

/// Report value standing in for "no price" (max int256)
pub fn invalid_price() -> U256 {
    U256::MAX >> 1
}

/// `10^decimals`, the fixed-point factor prices are multiplied by
pub fn precision_factor(decimals: u32) -> Decimal {
    let decimals = decimals.min(MAX_PRECISION_DECIMALS);
    Decimal::from_i128_with_scale(10_i128.pow(decimals), 0)
}

/// Scale a price into its on-chain integer form, truncating the remainder
///
/// Digits past `decimals` are dropped before multiplying so the product is
/// exact and never rounded up.
pub fn scale_price(symbol: &str, price: Decimal, decimals: u32) -> Result<U256, CommitmentError> {
    let overflow = || CommitmentError::Overflow {
        symbol: symbol.to_string(),
        price,
    };

    let decimals = decimals.min(MAX_PRECISION_DECIMALS);
    let truncated = price.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    let scaled = truncated
        .checked_mul(precision_factor(decimals))
        .ok_or_else(overflow)?
        .trunc();
    if scaled.is_sign_negative() && !scaled.is_zero() {
        return Err(CommitmentError::NegativePrice {
            symbol: symbol.to_string(),
            price,
        });
    }

    let value = scaled.to_u128().ok_or_else(overflow)?;
    Ok(U256::from(value))
}

/// Report vector in `symbols` order; missing prices become `invalid_price()`
pub fn round_reports(
    symbols: &[Symbol],
    prices: &HashMap<Symbol, PriceSample>,
    decimals: u32,
) -> Result<Vec<U256>, CommitmentError> {
    symbols
        .iter()
        .map(|symbol| match prices.get(symbol) {
            Some(sample) => scale_price(symbol, sample.price, decimals),
            None => Ok(invalid_price()),
        })
        .collect()
}

/// Bytes hashed into the commitment
pub fn commitment_preimage(reports: &[U256], salt: U256) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32 * (reports.len() + 1));
    let mut word = [0u8; 32];
    for value in reports.iter().chain(std::iter::once(&salt)) {
        value.to_big_endian(&mut word);
        bytes.extend_from_slice(&word);
    }
    bytes
}

pub fn commitment_hash(reports: &[U256], salt: U256) -> H256 {
    H256::from(keccak256(commitment_preimage(reports, salt)))
}

/// Fresh 256-bit salt from the OS entropy source
pub fn random_salt() -> U256 {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    U256::from_big_endian(&bytes)
}
