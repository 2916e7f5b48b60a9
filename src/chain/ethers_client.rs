//! Ethers-backed oracle contract client
//!
//! Connects over WebSocket, signs votes with the reporter key and forwards
//! `NewRound` / `NewSymbols` logs into a `ChainSubscription`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, SyncingStatus, TxHash, I256, U256};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ChainConnector, ChainError, ChainEvent, ChainSubscription, OracleChain, EVENT_BUFFER};
use crate::types::{Symbol, Vote};

abigen!(
    OracleContract,
    r#"[
        function getRound() external view returns (uint256)
        function getSymbols() external view returns (string[])
        function getVoters() external view returns (address[])
        function vote(uint256 commit, int256[] reports, uint256 salt) external
        event NewRound(uint256 round, uint256 height, uint256 timestamp, uint256 votePeriod)
        event NewSymbols(string[] symbols, uint256 round)
    ]"#
);

type SignedClient = SignerMiddleware<Provider<Ws>, LocalWallet>;

fn to_round(value: U256) -> Result<u64, ChainError> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Contract(format!("round {value} exceeds u64")));
    }
    Ok(value.low_u64())
}

fn contract_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Contract(e.to_string())
}

fn rpc_err(e: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(e.to_string())
}

/// Dials the node and binds the oracle contract
pub struct EthersConnector {
    ws_url: String,
    contract_address: Address,
    wallet: LocalWallet,
}

impl EthersConnector {
    pub fn new(ws_url: impl Into<String>, contract_address: Address, wallet: LocalWallet) -> Self {
        Self {
            ws_url: ws_url.into(),
            contract_address,
            wallet,
        }
    }
}

#[async_trait]
impl ChainConnector for EthersConnector {
    async fn connect(&self) -> Result<Arc<dyn OracleChain>, ChainError> {
        info!(url = %self.ws_url, contract = ?self.contract_address, "connecting to chain");

        let provider = Provider::<Ws>::connect(self.ws_url.as_str())
            .await
            .map_err(|e| ChainError::Connection(e.to_string()))?;
        let chain_id = provider.get_chainid().await.map_err(rpc_err)?;

        let wallet = self.wallet.clone().with_chain_id(chain_id.low_u64());
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = OracleContract::new(self.contract_address, client.clone());

        info!(chain_id = %chain_id, "chain connection established");

        Ok(Arc::new(EthersOracleChain {
            client,
            contract,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct EthersOracleChain {
    client: Arc<SignedClient>,
    contract: OracleContract<SignedClient>,
    closed: AtomicBool,
}

impl EthersOracleChain {
    fn ensure_open(&self) -> Result<(), ChainError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChainError::Closed);
        }
        Ok(())
    }

    fn forward_rounds(
        contract: OracleContract<SignedClient>,
        events: mpsc::Sender<ChainEvent>,
        ready: oneshot::Sender<Result<(), ChainError>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let filter = contract.event::<NewRoundFilter>();
            let mut stream = match filter.subscribe().await {
                Ok(stream) => {
                    let _ = ready.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready.send(Err(ChainError::Subscription(e.to_string())));
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(log) => match to_round(log.round) {
                        Ok(round) => ChainEvent::RoundChanged(round),
                        Err(e) => ChainEvent::SubscriptionError(e),
                    },
                    Err(e) => ChainEvent::SubscriptionError(ChainError::Subscription(e.to_string())),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }

            let _ = events
                .send(ChainEvent::SubscriptionError(ChainError::Closed))
                .await;
        })
    }

    fn forward_symbols(
        contract: OracleContract<SignedClient>,
        events: mpsc::Sender<ChainEvent>,
        ready: oneshot::Sender<Result<(), ChainError>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let filter = contract.event::<NewSymbolsFilter>();
            let mut stream = match filter.subscribe().await {
                Ok(stream) => {
                    let _ = ready.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready.send(Err(ChainError::Subscription(e.to_string())));
                    return;
                }
            };

            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(log) => ChainEvent::SymbolsChanged(log.symbols),
                    Err(e) => ChainEvent::SubscriptionError(ChainError::Subscription(e.to_string())),
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }

            let _ = events
                .send(ChainEvent::SubscriptionError(ChainError::Closed))
                .await;
        })
    }
}

#[async_trait]
impl OracleChain for EthersOracleChain {
    async fn current_round(&self) -> Result<u64, ChainError> {
        self.ensure_open()?;
        let round = self.contract.get_round().call().await.map_err(contract_err)?;
        to_round(round)
    }

    async fn symbols(&self) -> Result<Vec<Symbol>, ChainError> {
        self.ensure_open()?;
        self.contract.get_symbols().call().await.map_err(contract_err)
    }

    async fn voters(&self) -> Result<Vec<Address>, ChainError> {
        self.ensure_open()?;
        self.contract.get_voters().call().await.map_err(contract_err)
    }

    async fn is_syncing(&self) -> Result<bool, ChainError> {
        self.ensure_open()?;
        let status = self.client.syncing().await.map_err(rpc_err)?;
        Ok(!matches!(status, SyncingStatus::IsFalse))
    }

    async fn submit_vote(&self, vote: &Vote) -> Result<TxHash, ChainError> {
        self.ensure_open()?;
        let commit = U256::from_big_endian(vote.commit.as_bytes());
        let reports: Vec<I256> = vote.reports.iter().map(|r| I256::from_raw(*r)).collect();

        let call = self.contract.vote(commit, reports, vote.salt);
        let pending = call.send().await.map_err(contract_err)?;
        let tx_hash = pending.tx_hash();

        debug!(tx = ?tx_hash, reports = vote.reports.len(), "vote submitted");
        Ok(tx_hash)
    }

    async fn subscribe(&self) -> Result<ChainSubscription, ChainError> {
        self.ensure_open()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (rounds_ready_tx, rounds_ready) = oneshot::channel();
        let (symbols_ready_tx, symbols_ready) = oneshot::channel();

        let tasks = vec![
            Self::forward_rounds(self.contract.clone(), events_tx.clone(), rounds_ready_tx),
            Self::forward_symbols(self.contract.clone(), events_tx, symbols_ready_tx),
        ];
        let subscription = ChainSubscription::new(events_rx, tasks);

        for ready in [rounds_ready, symbols_ready] {
            match ready.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ChainError::Subscription(
                        "event forwarder exited before subscribing".to_string(),
                    ))
                }
            }
        }

        Ok(subscription)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!("chain connection closed");
    }
}
