//! Chain collaborator - Oracle contract access
//!
//! The reporter talks to the chain only through `OracleChain`; a
//! `ChainConnector` dials fresh connections so the reporter can rebuild one
//! after connectivity loss.

mod ethers_client;

pub use ethers_client::{EthersConnector, EthersOracleChain};

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, TxHash};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{Symbol, Vote};

/// Buffer of the chain event channel
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("connection closed")]
    Closed,
}

/// Notifications delivered by the chain subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    RoundChanged(u64),
    SymbolsChanged(Vec<Symbol>),
    SubscriptionError(ChainError),
}

/// Live event subscription
///
/// Dropping it (or calling `unsubscribe`) stops the forwarding tasks.
pub struct ChainSubscription {
    events: mpsc::Receiver<ChainEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChainSubscription {
    pub fn new(events: mpsc::Receiver<ChainEvent>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self { events, tasks }
    }

    /// Next event, `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ChainEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChainSubscription {
    fn drop(&mut self) {
        self.events.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Read/write access to the oracle contract
#[async_trait]
pub trait OracleChain: Send + Sync {
    async fn current_round(&self) -> Result<u64, ChainError>;

    /// Symbols of the current round, in vote order
    async fn symbols(&self) -> Result<Vec<Symbol>, ChainError>;

    async fn voters(&self) -> Result<Vec<Address>, ChainError>;

    async fn is_syncing(&self) -> Result<bool, ChainError>;

    async fn submit_vote(&self, vote: &Vote) -> Result<TxHash, ChainError>;

    /// Subscribe to round and symbol updates
    async fn subscribe(&self) -> Result<ChainSubscription, ChainError>;

    /// Release the underlying connection
    async fn close(&self);
}

/// Dials new chain connections
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn OracleChain>, ChainError>;
}
