//! New Transaction Created Handler
//!
//! Every validator signs the materialized transaction once it appears.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::WithdrawalId;
use crate::withdrawal::{
    BroadcastsProvider, RollbackService, SignCollector, TransactionStorage, UtxoProvider,
    WithdrawalStats,
};

pub struct NewTransactionCreatedHandler {
    tx_storage: Arc<dyn TransactionStorage>,
    broadcasts: Arc<dyn BroadcastsProvider>,
    sign_collector: Arc<dyn SignCollector>,
    utxos: Arc<dyn UtxoProvider>,
    rollback: Arc<dyn RollbackService>,
    stats: Arc<WithdrawalStats>,
}

impl NewTransactionCreatedHandler {
    pub fn new(
        tx_storage: Arc<dyn TransactionStorage>,
        broadcasts: Arc<dyn BroadcastsProvider>,
        sign_collector: Arc<dyn SignCollector>,
        utxos: Arc<dyn UtxoProvider>,
        rollback: Arc<dyn RollbackService>,
        stats: Arc<WithdrawalStats>,
    ) -> Self {
        Self {
            tx_storage,
            broadcasts,
            sign_collector,
            utxos,
            rollback,
            stats,
        }
    }

    pub async fn handle(&self, withdrawal_id: &WithdrawalId) {
        let record = match self.tx_storage.get(withdrawal_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(withdrawal_id = %withdrawal_id, "Transaction event without a stored record");
                return;
            }
            Err(e) => {
                self.rollback.rollback(withdrawal_id, None, &e.to_string()).await;
                return;
            }
        };

        // A rollback already released the reservations; do not take them back
        match self.broadcasts.has_been_rolled_back(withdrawal_id).await {
            Ok(true) => {
                debug!(withdrawal_id = %withdrawal_id, "Rolled back, not signing");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.rollback
                    .rollback(withdrawal_id, Some(&record.details), &e.to_string())
                    .await;
                return;
            }
        }

        // The agreed set is what this node now has to keep off other withdrawals
        if let Err(e) = self.utxos.register_unspents(withdrawal_id, &record.inputs).await {
            warn!(withdrawal_id = %withdrawal_id, error = %e, "Could not reserve agreed UTXOs");
        }

        match self.broadcasts.has_been_broadcast(&record.details).await {
            Ok(true) => {
                debug!(withdrawal_id = %withdrawal_id, "Already broadcast, not signing");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.rollback
                    .rollback(withdrawal_id, Some(&record.details), &e.to_string())
                    .await;
                return;
            }
        }

        match self.sign_collector.sign_and_save(&record).await {
            Ok(()) => self.stats.record_signature_posted(),
            Err(e) => {
                self.rollback
                    .rollback(withdrawal_id, Some(&record.details), &e.to_string())
                    .await
            }
        }
    }
}
