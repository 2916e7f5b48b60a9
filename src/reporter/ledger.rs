//! Round Ledger - Commitments awaiting their reveal
//!
//! Keeps the data committed in recent rounds so the next round can reveal
//! it. Retention is bounded; only the immediately preceding round is ever
//! read back.

use std::collections::{BTreeMap, HashMap};

use ethers::types::{TxHash, H256, U256};

use super::commitment::{commitment_hash, round_reports, CommitmentError};
use crate::types::{PriceSample, Symbol};

pub const DEFAULT_ROUND_RETENTION: u64 = 10;

/// What was committed for one round
///
/// Immutable after creation except for the single `submitted_tx` write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundData {
    round_id: u64,
    symbols: Vec<Symbol>,
    prices: HashMap<Symbol, PriceSample>,
    salt: U256,
    commitment: H256,
    submitted_tx: Option<TxHash>,
}

impl RoundData {
    /// Build the commitment for `symbols` (contract order) with `salt`
    pub fn commit(
        round_id: u64,
        symbols: Vec<Symbol>,
        prices: HashMap<Symbol, PriceSample>,
        salt: U256,
        decimals: u32,
    ) -> Result<Self, CommitmentError> {
        let reports = round_reports(&symbols, &prices, decimals)?;
        let commitment = commitment_hash(&reports, salt);
        Ok(Self {
            round_id,
            symbols,
            prices,
            salt,
            commitment,
            submitted_tx: None,
        })
    }

    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn prices(&self) -> &HashMap<Symbol, PriceSample> {
        &self.prices
    }

    pub fn salt(&self) -> U256 {
        self.salt
    }

    pub fn commitment(&self) -> H256 {
        self.commitment
    }

    pub fn submitted_tx(&self) -> Option<TxHash> {
        self.submitted_tx
    }

    /// Record the vote transaction; returns false if one was already set
    pub fn mark_submitted(&mut self, tx: TxHash) -> bool {
        if self.submitted_tx.is_some() {
            return false;
        }
        self.submitted_tx = Some(tx);
        true
    }

    /// Report vector revealing this round's commitment
    pub fn reveal(&self, decimals: u32) -> Result<Vec<U256>, CommitmentError> {
        round_reports(&self.symbols, &self.prices, decimals)
    }
}

pub struct RoundLedger {
    retention: u64,
    rounds: BTreeMap<u64, RoundData>,
}

impl RoundLedger {
    pub fn new(retention: u64) -> Self {
        Self {
            retention: retention.max(1),
            rounds: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, data: RoundData) {
        self.rounds.insert(data.round_id, data);
    }

    pub fn get(&self, round_id: u64) -> Option<&RoundData> {
        self.rounds.get(&round_id)
    }

    /// Data committed in the round right before `round_id`
    pub fn previous(&self, round_id: u64) -> Option<&RoundData> {
        self.get(round_id.checked_sub(1)?)
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn round_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.rounds.keys().copied()
    }

    /// Evict rounds at or below `current_round - retention` once the ledger is full
    ///
    /// Returns the number of evicted rounds.
    pub fn gc(&mut self, current_round: u64) -> usize {
        if (self.rounds.len() as u64) < self.retention {
            return 0;
        }
        let Some(cutoff) = current_round.checked_sub(self.retention) else {
            return 0;
        };

        let before = self.rounds.len();
        self.rounds.retain(|round_id, _| *round_id > cutoff);
        before - self.rounds.len()
    }
}

impl Default for RoundLedger {
    fn default() -> Self {
        Self::new(DEFAULT_ROUND_RETENTION)
    }
}
