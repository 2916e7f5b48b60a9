//! Tests for the reporting engine against a scripted chain

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use ethers::types::{Address, TxHash, H256};
    use rust_decimal_macros::dec;
    use tokio::sync::{mpsc, watch};
    use tokio_test::{assert_err, assert_ok};

    use oracle_reporter::chain::{
        ChainConnector, ChainError, ChainEvent, ChainSubscription, OracleChain, EVENT_BUFFER,
    };
    use oracle_reporter::oracle::{AggregationConfig, PriceFeed, SampleCache, SymbolRegistry};
    use oracle_reporter::reporter::commitment::commitment_hash;
    use oracle_reporter::reporter::{
        invalid_price, Reporter, ReporterConfig, ReporterError, RoundOutcome,
    };
    use oracle_reporter::types::{PriceSample, Symbol, Vote};

    // ============================================================================
    // Scripted chain
    // ============================================================================

    #[derive(Default)]
    struct ChainState {
        round: u64,
        symbols: Vec<Symbol>,
        voters: Vec<Address>,
        syncing: bool,
        votes: Vec<Vote>,
        connect_attempts: usize,
        fail_connects: usize,
        fail_reads: usize,
        closes: usize,
        subscribes: usize,
        events: Option<mpsc::Sender<ChainEvent>>,
    }

    struct FakeChain {
        state: Arc<Mutex<ChainState>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl OracleChain for FakeChain {
        async fn current_round(&self) -> Result<u64, ChainError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ChainError::Closed);
            }
            let mut state = self.state.lock().unwrap();
            if state.fail_reads > 0 {
                state.fail_reads -= 1;
                return Err(ChainError::Rpc("connection reset".into()));
            }
            Ok(state.round)
        }

        async fn symbols(&self) -> Result<Vec<Symbol>, ChainError> {
            Ok(self.state.lock().unwrap().symbols.clone())
        }

        async fn voters(&self) -> Result<Vec<Address>, ChainError> {
            Ok(self.state.lock().unwrap().voters.clone())
        }

        async fn is_syncing(&self) -> Result<bool, ChainError> {
            Ok(self.state.lock().unwrap().syncing)
        }

        async fn submit_vote(&self, vote: &Vote) -> Result<TxHash, ChainError> {
            let mut state = self.state.lock().unwrap();
            state.votes.push(vote.clone());
            Ok(TxHash::from_low_u64_be(state.votes.len() as u64))
        }

        async fn subscribe(&self) -> Result<ChainSubscription, ChainError> {
            let (tx, rx) = mpsc::channel(EVENT_BUFFER);
            let mut state = self.state.lock().unwrap();
            state.subscribes += 1;
            state.events = Some(tx);
            Ok(ChainSubscription::new(rx, Vec::new()))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.state.lock().unwrap().closes += 1;
        }
    }

    struct FakeConnector {
        state: Arc<Mutex<ChainState>>,
    }

    #[async_trait]
    impl ChainConnector for FakeConnector {
        async fn connect(&self) -> Result<Arc<dyn OracleChain>, ChainError> {
            {
                let mut state = self.state.lock().unwrap();
                state.connect_attempts += 1;
                if state.fail_connects > 0 {
                    state.fail_connects -= 1;
                    return Err(ChainError::Connection("node unreachable".into()));
                }
            }
            Ok(Arc::new(FakeChain {
                state: self.state.clone(),
                closed: AtomicBool::new(false),
            }))
        }
    }

    // ============================================================================
    // Fixtures
    // ============================================================================

    fn identity() -> Address {
        Address::from_low_u64_be(0xa11ce)
    }

    fn chain_state(round: u64) -> Arc<Mutex<ChainState>> {
        Arc::new(Mutex::new(ChainState {
            round,
            symbols: vec!["ETH-USD".into(), "BTC-USD".into(), "XAU-USD".into()],
            voters: vec![identity()],
            ..Default::default()
        }))
    }

    fn priced_feed() -> Arc<PriceFeed> {
        let cache = Arc::new(SampleCache::new("fake"));
        let now = Utc::now().timestamp();
        cache.add_samples(
            &[
                PriceSample::new("ETH-USD", dec!(3000.5), now),
                PriceSample::new("BTC-USD", dec!(65000), now),
            ],
            now,
        );
        Arc::new(PriceFeed::new(AggregationConfig::default(), vec![cache]))
    }

    fn config(retention: u64) -> ReporterConfig {
        ReporterConfig {
            identity: identity(),
            round_retention: retention,
            ..Default::default()
        }
    }

    async fn reporter_with(state: &Arc<Mutex<ChainState>>, config: ReporterConfig) -> Reporter {
        let connector = Arc::new(FakeConnector {
            state: state.clone(),
        });
        match Reporter::connect(config, connector, priced_feed(), Arc::new(SymbolRegistry::default())).await {
            Ok(reporter) => reporter,
            Err(e) => panic!("connect failed: {e}"),
        }
    }

    fn votes(state: &Arc<Mutex<ChainState>>) -> Vec<Vote> {
        state.lock().unwrap().votes.clone()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // ============================================================================
    // Rounds
    // ============================================================================

    #[tokio::test]
    async fn test_connect_bootstraps_round_and_symbols() {
        let state = chain_state(42);
        let symbols = Arc::new(SymbolRegistry::new(vec!["NTN-USD".into()]));
        let connector = Arc::new(FakeConnector {
            state: state.clone(),
        });
        let reporter = match Reporter::connect(config(10), connector, priced_feed(), symbols.clone()).await {
            Ok(reporter) => reporter,
            Err(e) => panic!("connect failed: {e}"),
        };

        assert_eq!(reporter.current_round(), 42);
        assert!(reporter.is_subscribed());
        assert_eq!(
            symbols.snapshot(),
            vec!["ETH-USD", "BTC-USD", "XAU-USD", "NTN-USD"]
        );
    }

    #[tokio::test]
    async fn test_first_round_commits_without_reveal() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;

        let outcome = assert_ok!(reporter.handle_round(5).await);
        let votes = votes(&state);
        assert_eq!(votes.len(), 1);
        assert_eq!(outcome, RoundOutcome::Committed { tx: TxHash::from_low_u64_be(1) });

        let vote = &votes[0];
        assert!(vote.reports.is_empty());
        assert_eq!(vote.salt, invalid_price());

        let data = reporter.ledger().get(5).unwrap();
        assert_eq!(vote.commit, data.commitment());
        assert_eq!(data.submitted_tx(), Some(TxHash::from_low_u64_be(1)));
        assert_eq!(data.prices().len(), 2);
    }

    #[tokio::test]
    async fn test_next_round_reveals_previous_commitment() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;

        reporter.handle_round(5).await.unwrap();
        reporter.handle_round(6).await.unwrap();

        let votes = votes(&state);
        let previous = reporter.ledger().get(5).unwrap();
        let reveal = &votes[1];

        assert_eq!(reveal.salt, previous.salt());
        assert_eq!(reveal.reports.len(), 3);
        assert_eq!(reveal.reports[2], invalid_price());
        assert_eq!(commitment_hash(&reveal.reports, reveal.salt), votes[0].commit);
        assert_ne!(reveal.commit, votes[0].commit);
    }

    #[tokio::test]
    async fn test_repeated_round_is_voted_once() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;

        assert_ok!(reporter.handle_round(5).await);
        let salt = reporter.ledger().get(5).unwrap().salt();
        let commit = reporter.ledger().get(5).unwrap().commitment();

        assert_eq!(assert_ok!(reporter.handle_round(5).await), RoundOutcome::Skipped);
        assert_eq!(votes(&state).len(), 1);
        assert_eq!(reporter.ledger().get(5).unwrap().salt(), salt);
        assert_eq!(reporter.ledger().get(5).unwrap().commitment(), commit);

        // Older rounds are ignored too
        assert_ok!(reporter.handle_round(6).await);
        assert_eq!(assert_ok!(reporter.handle_round(4).await), RoundOutcome::Skipped);
        assert_eq!(votes(&state).len(), 2);
        assert_eq!(reporter.current_round(), 6);
    }

    #[tokio::test]
    async fn test_round_gap_reveals_nothing() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;

        reporter.handle_round(5).await.unwrap();
        reporter.handle_round(7).await.unwrap();

        let vote = &votes(&state)[1];
        assert!(vote.reports.is_empty());
        assert_eq!(vote.salt, invalid_price());
        assert!(reporter.ledger().get(7).is_some());
    }

    #[tokio::test]
    async fn test_non_voter_without_history_is_skipped() {
        let state = chain_state(5);
        state.lock().unwrap().voters = vec![Address::from_low_u64_be(7)];
        let mut reporter = reporter_with(&state, config(10)).await;

        assert_eq!(reporter.handle_round(5).await.unwrap(), RoundOutcome::Skipped);
        assert!(votes(&state).is_empty());
        assert!(reporter.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_removed_voter_still_reveals() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;
        reporter.handle_round(5).await.unwrap();

        state.lock().unwrap().voters.clear();
        let outcome = assert_ok!(reporter.handle_round(6).await);

        assert!(matches!(outcome, RoundOutcome::RevealOnly { .. }));
        let votes = votes(&state);
        assert_eq!(votes[1].commit, H256::zero());
        assert!(votes[1].is_reveal_only());
        assert_eq!(votes[1].salt, reporter.ledger().get(5).unwrap().salt());
        assert!(reporter.ledger().get(6).is_none());
    }

    #[tokio::test]
    async fn test_syncing_chain_skips_round() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;
        state.lock().unwrap().syncing = true;

        assert!(matches!(
            reporter.handle_round(6).await,
            Err(ReporterError::Syncing)
        ));
        assert_eq!(reporter.current_round(), 6);
        assert!(votes(&state).is_empty());
    }

    #[tokio::test]
    async fn test_no_prices_without_history_fails() {
        let state = chain_state(5);
        state.lock().unwrap().symbols = vec!["XAU-USD".into()];
        let mut reporter = reporter_with(&state, config(10)).await;

        assert!(matches!(
            reporter.handle_round(5).await,
            Err(ReporterError::NoAvailablePrice(5))
        ));
        assert!(votes(&state).is_empty());
    }

    #[tokio::test]
    async fn test_no_prices_with_history_reveals_only() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;
        reporter.handle_round(5).await.unwrap();

        state.lock().unwrap().symbols = vec!["XAU-USD".into()];
        let outcome = reporter.handle_round(6).await.unwrap();

        assert!(matches!(outcome, RoundOutcome::RevealOnly { .. }));
        let votes = votes(&state);
        assert_eq!(commitment_hash(&votes[1].reports, votes[1].salt), votes[0].commit);
        assert!(reporter.ledger().get(6).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_symbols_abort_round() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;
        state.lock().unwrap().symbols = vec!["ETH-USD".into(), "ETH-USD".into()];

        assert!(matches!(
            reporter.handle_round(5).await,
            Err(ReporterError::MalformedSymbols(_))
        ));
        assert!(votes(&state).is_empty());
    }

    // ============================================================================
    // Health checks
    // ============================================================================

    #[tokio::test]
    async fn test_health_check_reconnects_once() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;

        state.lock().unwrap().fail_reads = 1;
        reporter.health_check().await;
        reporter.health_check().await;

        let state = state.lock().unwrap();
        assert_eq!(state.connect_attempts, 2);
        assert_eq!(state.closes, 1);
        assert_eq!(state.subscribes, 2);
        assert!(reporter.is_subscribed());
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_retried() {
        let state = chain_state(5);
        let mut reporter = reporter_with(&state, config(10)).await;

        {
            let mut state = state.lock().unwrap();
            state.fail_reads = 1;
            state.fail_connects = 1;
        }
        reporter.health_check().await;
        assert!(!reporter.is_subscribed());

        state.lock().unwrap().round = 9;
        reporter.health_check().await;

        assert!(reporter.is_subscribed());
        assert_eq!(reporter.current_round(), 9);
        assert_eq!(state.lock().unwrap().connect_attempts, 3);
    }

    #[tokio::test]
    async fn test_health_check_trims_ledger() {
        let state = chain_state(1);
        let mut reporter = reporter_with(&state, config(3)).await;

        for round in 1..=6 {
            reporter.handle_round(round).await.unwrap();
        }
        assert_eq!(reporter.ledger().len(), 6);

        reporter.health_check().await;
        assert_eq!(reporter.ledger().round_ids().collect::<Vec<_>>(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_fatal() {
        let state = chain_state(5);
        state.lock().unwrap().fail_connects = 1;
        let connector = Arc::new(FakeConnector {
            state: state.clone(),
        });

        let result = Reporter::connect(config(10), connector, priced_feed(), Arc::new(SymbolRegistry::default())).await;
        let err = assert_err!(result.map(|_| ()));
        assert!(matches!(err, ReporterError::Chain(ChainError::Connection(_))));
    }

    // ============================================================================
    // Event loop
    // ============================================================================

    #[tokio::test]
    async fn test_run_handles_events_until_shutdown() {
        let state = chain_state(5);
        let symbols = Arc::new(SymbolRegistry::default());
        let connector = Arc::new(FakeConnector {
            state: state.clone(),
        });
        let reporter_config = ReporterConfig {
            health_check_interval: Duration::from_millis(50),
            ..config(10)
        };
        let reporter = match Reporter::connect(reporter_config, connector, priced_feed(), symbols.clone()).await {
            Ok(reporter) => reporter,
            Err(e) => panic!("connect failed: {e}"),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reporter.run(shutdown_rx));

        let events = state.lock().unwrap().events.clone().unwrap();
        events.send(ChainEvent::RoundChanged(6)).await.unwrap();
        wait_until(|| state.lock().unwrap().votes.len() == 1).await;

        events
            .send(ChainEvent::SymbolsChanged(vec!["ATN-USD".into()]))
            .await
            .unwrap();
        wait_until(|| symbols.chain_symbols() == vec!["ATN-USD".to_string()]).await;

        events
            .send(ChainEvent::SubscriptionError(ChainError::Subscription("dropped".into())))
            .await
            .unwrap();
        wait_until(|| state.lock().unwrap().subscribes == 2).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();

        assert_eq!(state.lock().unwrap().closes, 2);
    }
}
