//! Bridge Node
//!
//! Wires one validator's saga: collaborators over a shared [`Ledger`], the
//! handlers on top of them and the router feeding ledger events in.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bitcoin::{BtcNetwork, UnspentSource};
use crate::common::{BridgeConfig, Result};
use crate::handler::{
    BroadcastRecordedHandler, EventRouter, Handlers, NewConsensusDataHandler, NewSignatureEventHandler,
    NewTransactionCreatedHandler, RollbackHandler, TransferHandler,
};
use crate::ledger::Ledger;
use crate::types::{Namespace, TransferCommand, WithdrawalId};
use crate::withdrawal::{
    BtcRollbackService, FinalizationService, LedgerBroadcasts, LedgerConsensusProvider,
    LedgerSignCollector, LedgerTransactionStorage, MultisigSigner, MultisigWallet, SharedFeeRate,
    StatsSnapshot, TransactionCreator, WalletUtxoProvider, WithdrawalReport, WithdrawalStats,
    WithdrawalTracker,
};

pub struct BridgeNode {
    node_id: String,
    ledger: Ledger,
    multisig: MultisigWallet,
    utxos: Arc<WalletUtxoProvider>,
    tracker: WithdrawalTracker,
    stats: Arc<WithdrawalStats>,
    router: EventRouter,
}

impl BridgeNode {
    pub fn new(
        config: &BridgeConfig,
        ledger: Ledger,
        wallet: Arc<dyn UnspentSource>,
        network: Arc<dyn BtcNetwork>,
        fee_rate: SharedFeeRate,
    ) -> Result<Self> {
        let node_id = config.node_id.clone();
        let validators = config.validator_pubkeys.len();
        let multisig = MultisigWallet::new(
            &config.validator_pubkeys,
            config.multisig_threshold,
            config.network.bitcoin_network(),
        )?;
        let signer = MultisigSigner::from_secret_key(config.signer_secret_key()?);
        let stats = Arc::new(WithdrawalStats::new());

        let utxos = Arc::new(WalletUtxoProvider::new(wallet, fee_rate.clone()));
        let tx_storage = Arc::new(LedgerTransactionStorage::new(ledger.clone(), node_id.clone()));
        let broadcasts = Arc::new(LedgerBroadcasts::new(ledger.clone(), node_id.clone()));
        let sign_collector = Arc::new(LedgerSignCollector::new(ledger.clone(), signer, multisig.clone()));
        let consensus = Arc::new(LedgerConsensusProvider::new(
            ledger.clone(),
            node_id.clone(),
            utxos.clone(),
            tx_storage.clone(),
            TransactionCreator::new(&multisig),
            fee_rate.clone(),
            config.consensus_quorum,
            validators,
            config.min_confirmations,
        ));
        let rollback = Arc::new(BtcRollbackService::new(
            ledger.clone(),
            node_id.clone(),
            utxos.clone(),
            broadcasts.clone(),
            stats.clone(),
        ));

        let handlers = Handlers {
            transfer: TransferHandler::new(
                config.bridge_account.clone(),
                broadcasts.clone(),
                consensus.clone(),
                rollback.clone(),
                TransactionCreator::new(&multisig),
                fee_rate,
                stats.clone(),
            ),
            consensus: NewConsensusDataHandler::new(
                consensus,
                broadcasts.clone(),
                rollback.clone(),
                stats.clone(),
            ),
            tx_created: NewTransactionCreatedHandler::new(
                tx_storage.clone(),
                broadcasts.clone(),
                sign_collector.clone(),
                utxos.clone(),
                rollback.clone(),
                stats.clone(),
            ),
            signature: NewSignatureEventHandler::new(
                tx_storage,
                broadcasts,
                sign_collector,
                network,
                rollback,
                stats.clone(),
            ),
            rollback: RollbackHandler::new(utxos.clone()),
            broadcast: BroadcastRecordedHandler::new(
                ledger.clone(),
                FinalizationService::new(ledger.clone(), node_id.clone()),
                stats.clone(),
            ),
        };

        Ok(Self {
            tracker: WithdrawalTracker::new(ledger.clone(), config.consensus_quorum, validators),
            router: EventRouter::new(handlers, ledger.clone()),
            node_id,
            ledger,
            multisig,
            utxos,
            stats,
        })
    }

    /// Subscribe to the ledger and handle events until it closes
    pub fn start(&self) -> JoinHandle<()> {
        let events = self.ledger.subscribe();
        info!(
            target: "bridge::system",
            node_id = %self.node_id,
            address = %self.multisig.address(),
            "Withdrawal node started"
        );
        tokio::spawn(self.router.clone().run(events))
    }

    /// Post a transfer command to the ledger
    pub async fn submit_transfer(&self, transfer: &TransferCommand) -> Result<WithdrawalId> {
        let id = transfer.to_details().withdrawal_id();
        self.ledger
            .put(Namespace::Transfers, &id, &self.node_id, transfer)
            .await?;
        Ok(id)
    }

    pub async fn status(&self, withdrawal_id: &WithdrawalId) -> Result<WithdrawalReport> {
        self.tracker.report(withdrawal_id).await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn multisig(&self) -> &MultisigWallet {
        &self.multisig
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Outputs currently reserved on this node
    pub async fn reserved_utxos(&self) -> usize {
        self.utxos.reserved_count().await
    }

    /// Withdrawals with events being handled right now
    pub async fn active_withdrawals(&self) -> usize {
        self.router.active().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::{Network, DEFAULT_BRIDGE_ACCOUNT};
    use crate::storage::MemoryFactStore;
    use crate::testing::{secret, secret_hex, transfer, txid, utxo, FakeNetwork, FakeWallet};
    use crate::ledger::SequencedEvent;
    use crate::types::{BroadcastRecord, FinalizationRecord, LedgerEvent, RollbackRecord, SagaState};
    use crate::withdrawal::StaticFeeRate;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use std::time::Duration;

    fn config(i: u8) -> BridgeConfig {
        let secp = Secp256k1::new();
        let validator_pubkeys = (1..=3)
            .map(|k| PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&secret(k)).unwrap()))
            .collect();
        BridgeConfig {
            network: Network::Testnet,
            esplora_url: String::new(),
            node_id: format!("node-{}", i),
            bridge_account: DEFAULT_BRIDGE_ACCOUNT.to_string(),
            signer_key: secret_hex(i),
            validator_pubkeys,
            multisig_threshold: 2,
            consensus_quorum: 2,
            min_confirmations: 1,
            fee_rate: Some(10),
            fee_refresh_secs: 60,
            db_path: ":memory:".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }

    struct Cluster {
        ledger: Ledger,
        network: Arc<FakeNetwork>,
        nodes: Vec<BridgeNode>,
    }

    fn cluster(wallet: Vec<crate::types::UnspentOutput>) -> Cluster {
        cluster_on(Ledger::new(Arc::new(MemoryFactStore::new())), wallet)
    }

    fn cluster_on(ledger: Ledger, wallet: Vec<crate::types::UnspentOutput>) -> Cluster {
        let wallet = Arc::new(FakeWallet::new(wallet, 1_000));
        let network = Arc::new(FakeNetwork::default());
        let nodes = (1..=3)
            .map(|i| {
                BridgeNode::new(
                    &config(i),
                    ledger.clone(),
                    wallet.clone(),
                    network.clone(),
                    Arc::new(StaticFeeRate(10)),
                )
                .unwrap()
            })
            .collect();
        Cluster { ledger, network, nodes }
    }

    impl Cluster {
        async fn wait_for(&self, id: &WithdrawalId, state: SagaState, finalized: bool) {
            let wait = async {
                loop {
                    let report = self.nodes[0].status(id).await.unwrap();
                    if report.state == state && report.finalized == finalized {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            };
            tokio::time::timeout(Duration::from_secs(10), wait)
                .await
                .expect("saga did not reach the expected state");
        }

        async fn settle(&self) {
            for _ in 0..100 {
                let mut busy = 0;
                for node in &self.nodes {
                    busy += node.active_withdrawals().await;
                }
                if busy == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_three_nodes_complete_a_withdrawal() {
        let c = cluster(vec![utxo(&txid(9), 0, 100_000, 6)]);
        for node in &c.nodes {
            node.start();
        }

        let id = c.nodes[0].submit_transfer(&transfer(40_000)).await.unwrap();
        c.wait_for(&id, SagaState::Broadcast, true).await;
        c.settle().await;

        let broadcasts: Vec<(String, BroadcastRecord)> =
            c.ledger.read(Namespace::Broadcasts, &id).await.unwrap();
        let finalizations: Vec<(String, FinalizationRecord)> =
            c.ledger.read(Namespace::Finalizations, &id).await.unwrap();
        let rollbacks: Vec<(String, RollbackRecord)> = c.ledger.read(Namespace::Rollbacks, &id).await.unwrap();

        assert_eq!(broadcasts.len(), 1);
        assert_eq!(finalizations.len(), 1);
        assert!(rollbacks.is_empty());
        assert_eq!(finalizations[0].1.amount_sat, 40_000);

        let relayed = c.network.distinct_txids();
        assert_eq!(relayed.len(), 1);
        assert!(relayed.contains(&broadcasts[0].1.btc_txid));

        let tx = c.network.last().unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].witness.len(), 4);

        let report = c.nodes[1].status(&id).await.unwrap();
        assert!(report.proposals >= 2);
        assert!(report.signatures >= 2);
        assert!(report.to_string().contains("finalized"));
    }

    #[tokio::test]
    async fn test_unfunded_withdrawal_rolls_back() {
        let c = cluster(vec![utxo(&txid(9), 0, 10_000, 6)]);
        for node in &c.nodes {
            node.start();
        }

        let id = c.nodes[0].submit_transfer(&transfer(40_000)).await.unwrap();
        c.wait_for(&id, SagaState::RolledBack, false).await;
        c.settle().await;

        let report = c.nodes[2].status(&id).await.unwrap();
        assert!(report.rollback_reason.unwrap().contains("insufficient funds"));
        assert_eq!(c.network.broadcasts(), 0);
        for node in &c.nodes {
            assert_eq!(node.reserved_utxos().await, 0);
        }
    }

    #[tokio::test]
    async fn test_rolled_back_withdrawal_is_never_broadcast() {
        let c = cluster(vec![utxo(&txid(9), 0, 100_000, 6)]);
        for node in &c.nodes {
            node.start();
        }

        let cmd = transfer(40_000);
        let id = cmd.to_details().withdrawal_id();
        let record = RollbackRecord {
            withdrawal_id: id.clone(),
            reason: "no fee data".to_string(),
            details: Some(cmd.to_details()),
            utxos: Vec::new(),
            created_at: 0,
        };
        c.ledger.put(Namespace::Rollbacks, &id, "node-3", &record).await.unwrap();

        c.nodes[0].submit_transfer(&cmd).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        c.settle().await;

        assert_eq!(c.network.broadcasts(), 0);
        assert!(!c.ledger.exists(Namespace::Broadcasts, &id).await.unwrap());
        assert_eq!(c.nodes[1].status(&id).await.unwrap().state, SagaState::RolledBack);
        for node in &c.nodes {
            assert_eq!(node.stats().started, 0);
            assert_eq!(node.reserved_utxos().await, 0);
        }
    }

    #[tokio::test]
    async fn test_lagging_router_replays_missed_facts() {
        // Writes are not published, so the transfer only reaches a router
        // through its lag recovery
        let c = cluster_on(
            Ledger::tailing(Arc::new(MemoryFactStore::new())),
            vec![utxo(&txid(9), 0, 100_000, 6)],
        );
        let id = c.nodes[0].submit_transfer(&transfer(40_000)).await.unwrap();

        for node in &c.nodes {
            let (sender, receiver) = tokio::sync::broadcast::channel(1);
            for seq in [100, 101] {
                let event = LedgerEvent::Finalized {
                    withdrawal_id: WithdrawalId::from("unrelated"),
                };
                sender.send(SequencedEvent { seq, event }).unwrap();
            }
            drop(sender);
            node.router.clone().run(receiver).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        c.settle().await;

        let proposals: Vec<(String, crate::types::WithdrawalConsensus)> =
            c.ledger.read(Namespace::Consensus, &id).await.unwrap();
        assert_eq!(proposals.len(), 3);
        for node in &c.nodes {
            assert_eq!(node.stats().started, 1);
        }
    }

    #[tokio::test]
    async fn test_transfer_to_other_account_is_ignored() {
        let c = cluster(vec![utxo(&txid(9), 0, 100_000, 6)]);
        for node in &c.nodes {
            node.start();
        }

        let mut cmd = transfer(40_000);
        cmd.destination_account = "bob@d3".to_string();
        let id = c.nodes[0].submit_transfer(&cmd).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        c.settle().await;

        assert_eq!(c.nodes[0].status(&id).await.unwrap().state, SagaState::Requested);
        assert_eq!(c.nodes[0].stats().started, 0);
    }
}
