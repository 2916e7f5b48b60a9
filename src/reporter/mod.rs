//! Reporter - Round-based commit/reveal voting engine
//!
//! On every new round the reporter commits to this round's prices and
//! reveals the previous round's commitment in the same `vote` transaction.
//! A periodic health check rebuilds the chain connection after
//! connectivity loss and garbage-collects the round ledger.
//!
//! Events are handled one at a time; a round either completes or fails
//! before the next event is looked at.

pub mod commitment;
mod ledger;

pub use commitment::{invalid_price, precision_factor, CommitmentError};
pub use ledger::{RoundData, RoundLedger, DEFAULT_ROUND_RETENTION};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethers::types::{Address, TxHash, H256};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::chain::{ChainConnector, ChainError, ChainEvent, ChainSubscription, OracleChain};
use crate::oracle::{PriceFeed, SymbolRegistry};
use crate::types::{first_duplicate, Vote};

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("chain is still synchronizing")]
    Syncing,
    #[error("no price available for round {0}")]
    NoAvailablePrice(u64),
    #[error("malformed symbol list: {0}")]
    MalformedSymbols(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Commitment(#[from] CommitmentError),
}

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Address the reporter votes with
    pub identity: Address,
    pub health_check_interval: Duration,
    /// Number of rounds kept in the ledger
    pub round_retention: u64,
    /// Decimal places kept when prices are scaled for voting
    pub price_decimals: u32,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            identity: Address::zero(),
            health_check_interval: Duration::from_secs(120),
            round_retention: DEFAULT_ROUND_RETENTION,
            price_decimals: 7,
        }
    }
}

/// How a round was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// New commitment (and any pending reveal) submitted
    Committed { tx: TxHash },
    /// Only the previous round was revealed
    RevealOnly { tx: TxHash },
    /// Nothing to commit and nothing to reveal
    Skipped,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Committed { tx } => write!(f, "committed ({:?})", tx),
            RoundOutcome::RevealOnly { tx } => write!(f, "reveal-only ({:?})", tx),
            RoundOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

pub struct Reporter {
    config: ReporterConfig,
    connector: Arc<dyn ChainConnector>,
    chain: Arc<dyn OracleChain>,
    subscription: Option<ChainSubscription>,
    feed: Arc<PriceFeed>,
    symbols: Arc<SymbolRegistry>,
    ledger: RoundLedger,
    current_round: u64,
    /// Last round a vote was submitted for
    last_voted: Option<u64>,
}

impl Reporter {
    /// Dial the chain and bootstrap round and symbol state
    ///
    /// Failure here is fatal for the process: without a first connection
    /// there is no round to report on.
    pub async fn connect(
        config: ReporterConfig,
        connector: Arc<dyn ChainConnector>,
        feed: Arc<PriceFeed>,
        symbols: Arc<SymbolRegistry>,
    ) -> Result<Self, ReporterError> {
        let chain = connector.connect().await?;
        let ledger = RoundLedger::new(config.round_retention);

        let mut reporter = Self {
            config,
            connector,
            chain,
            subscription: None,
            feed,
            symbols,
            ledger,
            current_round: 0,
            last_voted: None,
        };
        reporter.bootstrap().await?;

        Ok(reporter)
    }

    pub fn current_round(&self) -> u64 {
        self.current_round
    }

    pub fn ledger(&self) -> &RoundLedger {
        &self.ledger
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Fetch round and symbols from the chain and (re)arm the subscription
    async fn bootstrap(&mut self) -> Result<(), ReporterError> {
        let round = self.chain.current_round().await?;
        let symbols = self.chain.symbols().await?;
        let subscription = self.chain.subscribe().await?;

        info!(round, symbols = ?symbols, "chain state loaded");

        self.current_round = round;
        self.symbols.set_chain_symbols(symbols);
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Run one round of the commit/reveal protocol
    ///
    /// A round is voted on at most once; repeated or older rounds are skipped.
    pub async fn handle_round(&mut self, round: u64) -> Result<RoundOutcome, ReporterError> {
        if self.ledger.get(round).is_some() || self.last_voted.is_some_and(|last| round <= last) {
            debug!(round, last_voted = ?self.last_voted, "round already handled, ignoring");
            return Ok(RoundOutcome::Skipped);
        }
        self.current_round = round;

        if self.chain.is_syncing().await? {
            return Err(ReporterError::Syncing);
        }

        let voters = self.chain.voters().await?;
        let is_voter = voters.contains(&self.config.identity);

        let last = self.ledger.previous(round);
        let has_last = last.is_some();
        let (reports, salt) = match last {
            Some(data) => (data.reveal(self.config.price_decimals)?, data.salt()),
            None => {
                debug!(round, "no data for previous round, nothing to reveal");
                (Vec::new(), invalid_price())
            }
        };

        if is_voter {
            match self.build_round_data(round).await {
                Ok(mut data) => {
                    let vote = Vote {
                        commit: data.commitment(),
                        reports,
                        salt,
                    };
                    let tx = self.chain.submit_vote(&vote).await?;
                    data.mark_submitted(tx);
                    self.ledger.insert(data);
                    self.last_voted = Some(round);
                    return Ok(RoundOutcome::Committed { tx });
                }
                Err(ReporterError::NoAvailablePrice(_)) if has_last => {
                    warn!(round, "no prices for this round, revealing previous round only");
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!(round, identity = ?self.config.identity, "not in voter set");
        }

        if !has_last {
            return Ok(RoundOutcome::Skipped);
        }

        let vote = Vote {
            commit: H256::zero(),
            reports,
            salt,
        };
        let tx = self.chain.submit_vote(&vote).await?;
        self.last_voted = Some(round);
        Ok(RoundOutcome::RevealOnly { tx })
    }

    /// Commit to the current prices of the contract's symbols
    async fn build_round_data(&self, round: u64) -> Result<RoundData, ReporterError> {
        let symbols = self.chain.symbols().await?;
        if let Some(duplicate) = first_duplicate(&symbols) {
            return Err(ReporterError::MalformedSymbols(format!(
                "duplicate symbol {duplicate}"
            )));
        }

        let prices = self.feed.prices_for(&symbols, Utc::now().timestamp());
        if prices.is_empty() {
            return Err(ReporterError::NoAvailablePrice(round));
        }

        debug!(round, symbols = symbols.len(), priced = prices.len(), "building commitment");

        let salt = commitment::random_salt();
        Ok(RoundData::commit(
            round,
            symbols,
            prices,
            salt,
            self.config.price_decimals,
        )?)
    }

    /// Probe the chain, rebuild the connection when it is gone, GC the ledger
    pub async fn health_check(&mut self) {
        let evicted = self.ledger.gc(self.current_round);
        if evicted > 0 {
            debug!(evicted, round = self.current_round, "round ledger trimmed");
        }

        let health = self.chain.current_round().await;
        if health.is_ok() && self.subscription.is_some() {
            return;
        }

        match health {
            Err(e) => warn!(error = %e, "chain health check failed, rebuilding connection"),
            Ok(_) => warn!("chain subscription lost, rebuilding connection"),
        }

        if let Err(e) = self.rebuild_connection().await {
            error!(error = %e, "failed to rebuild chain connection, retrying on next health check");
        }
    }

    async fn rebuild_connection(&mut self) -> Result<(), ReporterError> {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.chain.close().await;

        self.chain = self.connector.connect().await?;
        self.bootstrap().await?;

        info!(round = self.current_round, "chain connection rebuilt");
        Ok(())
    }

    async fn handle_event(&mut self, event: ChainEvent) {
        match event {
            ChainEvent::RoundChanged(round) => match self.handle_round(round).await {
                Ok(outcome) => info!(round, outcome = %outcome, "round handled"),
                Err(ReporterError::Syncing) => {
                    warn!(round, "chain is synchronizing, skipping round")
                }
                Err(e) => error!(round, error = %e, "round aborted"),
            },
            ChainEvent::SymbolsChanged(symbols) => {
                info!(symbols = ?symbols, "oracle symbols updated");
                self.symbols.set_chain_symbols(symbols);
            }
            ChainEvent::SubscriptionError(e) => {
                warn!(error = %e, "chain subscription failed");
                self.subscription = None;
            }
        }
    }

    /// Main loop; returns after `shutdown` fires
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.health_check_interval;
        let mut health = interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(round = self.current_round, identity = ?self.config.identity, "reporter started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = health.tick() => self.health_check().await,
                event = next_event(&mut self.subscription) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("chain subscription closed");
                        self.subscription = None;
                    }
                },
            }
        }

        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.chain.close().await;
        info!(round = self.current_round, "reporter stopped");
    }
}

async fn next_event(subscription: &mut Option<ChainSubscription>) -> Option<ChainEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
