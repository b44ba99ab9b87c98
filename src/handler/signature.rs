//! New Signature Event Handler
//!
//! Runs on each signature contribution. Once the multisig threshold is met
//! the contributions are merged and the transaction is relayed, then the
//! broadcast fact is recorded.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::bitcoin::BtcNetwork;
use crate::common::{log_withdrawal_event, EventCategory};
use crate::types::{TransactionRecord, WithdrawalId};
use crate::withdrawal::{
    BroadcastsProvider, RollbackService, SignCollector, TransactionStorage, WithdrawalStats,
};

pub struct NewSignatureEventHandler {
    tx_storage: Arc<dyn TransactionStorage>,
    broadcasts: Arc<dyn BroadcastsProvider>,
    sign_collector: Arc<dyn SignCollector>,
    network: Arc<dyn BtcNetwork>,
    rollback: Arc<dyn RollbackService>,
    stats: Arc<WithdrawalStats>,
}

impl NewSignatureEventHandler {
    pub fn new(
        tx_storage: Arc<dyn TransactionStorage>,
        broadcasts: Arc<dyn BroadcastsProvider>,
        sign_collector: Arc<dyn SignCollector>,
        network: Arc<dyn BtcNetwork>,
        rollback: Arc<dyn RollbackService>,
        stats: Arc<WithdrawalStats>,
    ) -> Self {
        Self {
            tx_storage,
            broadcasts,
            sign_collector,
            network,
            rollback,
            stats,
        }
    }

    pub async fn handle(&self, withdrawal_id: &WithdrawalId) {
        let record = match self.tx_storage.get(withdrawal_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(withdrawal_id = %withdrawal_id, "Signature before transaction record");
                return;
            }
            Err(e) => {
                self.rollback.rollback(withdrawal_id, None, &e.to_string()).await;
                return;
            }
        };

        match self.broadcasts.is_settled(&record.details).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                self.rollback
                    .rollback(withdrawal_id, Some(&record.details), &e.to_string())
                    .await;
                return;
            }
        }

        self.broadcast_if_enough_signatures(&record).await;
    }

    pub async fn broadcast_if_enough_signatures(&self, record: &TransactionRecord) {
        let id = &record.withdrawal_id;
        let details = &record.details;

        let contributions = match self.sign_collector.get_signatures(id).await {
            Ok(contributions) => contributions,
            Err(e) => {
                self.rollback.rollback(id, Some(details), &e.to_string()).await;
                return;
            }
        };

        let threshold = self.sign_collector.threshold();
        if contributions.len() < threshold {
            debug!(withdrawal_id = %id, have = contributions.len(), need = threshold, "Waiting for signatures");
            return;
        }

        let tx = match self.sign_collector.merge(record, &contributions) {
            Ok(tx) => tx,
            Err(e) => {
                debug!(withdrawal_id = %id, error = %e, "Signatures not mergeable yet");
                return;
            }
        };

        match self.broadcasts.try_begin(id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(withdrawal_id = %id, "Broadcast in progress or done");
                return;
            }
            Err(e) => {
                self.rollback.rollback(id, Some(details), &e.to_string()).await;
                return;
            }
        }

        let result = self.network.broadcast(&tx).await;
        let txid = match result {
            Ok(txid) => txid,
            Err(e) => {
                self.broadcasts.finish(id).await;
                error!(target: "bridge::broadcast", withdrawal_id = %id, error = %e, "Broadcast failed");
                self.rollback.rollback(id, Some(details), &e.to_string()).await;
                return;
            }
        };

        // The transaction is out; a failed mark must not roll it back
        if let Err(e) = self.broadcasts.mark_as_broadcast(details, &txid).await {
            error!(
                target: "bridge::broadcast",
                withdrawal_id = %id,
                txid = %txid,
                error = %e,
                "Transaction relayed but broadcast fact not recorded"
            );
        }
        self.broadcasts.finish(id).await;

        self.stats.record_broadcast(details.amount_sat);
        info!(
            target: "bridge::broadcast",
            withdrawal_id = %id,
            txid = %txid,
            signatures = contributions.len(),
            "Withdrawal broadcast"
        );
        log_withdrawal_event(
            EventCategory::Broadcast,
            "withdrawal_broadcast",
            id.as_str(),
            details.amount_sat,
            &details.destination_address,
            true,
            Some(&txid),
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        sample_record, FakeBroadcasts, FakeNetwork, FakeRollback, FakeSignCollector, FakeTxStorage,
    };
    use std::sync::atomic::Ordering;

    struct Fixture {
        tx_storage: Arc<FakeTxStorage>,
        broadcasts: Arc<FakeBroadcasts>,
        signs: Arc<FakeSignCollector>,
        network: Arc<FakeNetwork>,
        rollback: Arc<FakeRollback>,
    }

    impl Fixture {
        fn new(contributions: usize) -> Self {
            let signs = FakeSignCollector::default();
            signs.contributions.store(contributions, Ordering::SeqCst);
            Self {
                tx_storage: Arc::new(FakeTxStorage::with_record(sample_record(40_000))),
                broadcasts: Arc::new(FakeBroadcasts::default()),
                signs: Arc::new(signs),
                network: Arc::new(FakeNetwork::default()),
                rollback: Arc::new(FakeRollback::default()),
            }
        }

        async fn run(&self) {
            NewSignatureEventHandler::new(
                self.tx_storage.clone(),
                self.broadcasts.clone(),
                self.signs.clone(),
                self.network.clone(),
                self.rollback.clone(),
                Arc::new(WithdrawalStats::new()),
            )
            .handle(&sample_record(40_000).withdrawal_id)
            .await
        }
    }

    #[tokio::test]
    async fn test_waits_below_threshold() {
        let f = Fixture::new(1);
        f.run().await;
        assert_eq!(f.network.broadcasts(), 0);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_broadcasts_at_threshold() {
        let f = Fixture::new(2);
        f.run().await;
        assert_eq!(f.network.broadcasts(), 1);
        assert_eq!(f.broadcasts.mark_calls.load(Ordering::SeqCst), 1);
        assert!(f.broadcasts.is_broadcast());

        // Replay after the fence is set does nothing
        f.run().await;
        assert_eq!(f.network.broadcasts(), 1);
        assert_eq!(f.broadcasts.mark_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rolled_back_is_never_relayed() {
        let f = Fixture::new(2);
        f.broadcasts.set_rolled_back(true);
        f.run().await;
        assert_eq!(f.network.broadcasts(), 0);
        assert_eq!(f.broadcasts.mark_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_check_failure_rolls_back() {
        let f = Fixture::new(2);
        f.broadcasts.fail_check.store(true, Ordering::SeqCst);
        f.run().await;
        assert_eq!(f.rollback.calls(), 1);
        assert_eq!(f.network.broadcasts(), 0);
        assert_eq!(f.signs.sign_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_signatures_failure_rolls_back() {
        let f = Fixture::new(2);
        f.signs.fail_get.store(true, Ordering::SeqCst);
        f.run().await;
        assert_eq!(f.rollback.calls(), 1);
        assert_eq!(f.network.broadcasts(), 0);
    }

    #[tokio::test]
    async fn test_merge_failure_waits() {
        let f = Fixture::new(2);
        f.signs.fail_merge.store(true, Ordering::SeqCst);
        f.run().await;
        assert_eq!(f.rollback.calls(), 0);
        assert_eq!(f.network.broadcasts(), 0);
    }

    #[tokio::test]
    async fn test_network_failure_rolls_back() {
        let f = Fixture::new(2);
        f.network.fail.store(true, Ordering::SeqCst);
        f.run().await;
        assert_eq!(f.rollback.calls(), 1);
        assert_eq!(f.broadcasts.mark_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mark_failure_does_not_roll_back() {
        let f = Fixture::new(2);
        f.broadcasts.fail_mark.store(true, Ordering::SeqCst);
        f.run().await;
        assert_eq!(f.network.broadcasts(), 1);
        assert_eq!(f.rollback.calls(), 0);
    }
}
