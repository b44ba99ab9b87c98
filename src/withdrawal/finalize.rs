//! Withdrawal Finalization
//!
//! Settles the ledger side once the Bitcoin transaction is out: the
//! withdrawn amount is burned and the withdrawal fee is paid. Written once
//! per withdrawal, whichever node sees the broadcast record first.

use tracing::{debug, info};

use crate::common::Result;
use crate::ledger::{is_duplicate, Ledger};
use crate::types::{BroadcastRecord, FinalizationRecord, Namespace};

#[derive(Clone)]
pub struct FinalizationService {
    ledger: Ledger,
    node_id: String,
}

impl FinalizationService {
    pub fn new(ledger: Ledger, node_id: impl Into<String>) -> Self {
        Self {
            ledger,
            node_id: node_id.into(),
        }
    }

    /// Post the finalization record; `false` if another node already did
    pub async fn finalize(&self, broadcast: &BroadcastRecord) -> Result<bool> {
        let record = FinalizationRecord {
            withdrawal_id: broadcast.withdrawal_id.clone(),
            source_account: broadcast.details.source_account.clone(),
            amount_sat: broadcast.details.amount_sat,
            fee_sat: broadcast.details.withdrawal_fee_sat,
            btc_txid: broadcast.btc_txid.clone(),
        };

        match self
            .ledger
            .put_once(Namespace::Finalizations, &record.withdrawal_id, &self.node_id, &record)
            .await
        {
            Ok(_) => {
                info!(
                    withdrawal_id = %record.withdrawal_id,
                    amount = record.amount_sat,
                    fee = record.fee_sat,
                    txid = %record.btc_txid,
                    "Withdrawal finalized"
                );
                Ok(true)
            }
            Err(e) if is_duplicate(&e) => {
                debug!(withdrawal_id = %record.withdrawal_id, "Already finalized");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFactStore;
    use crate::testing::details;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_finalize_once() {
        let ledger = Ledger::new(Arc::new(MemoryFactStore::new()));
        let d = details(40_000).with_fee(250);
        let broadcast = BroadcastRecord {
            withdrawal_id: d.withdrawal_id(),
            details: d.clone(),
            btc_txid: "ab".repeat(32),
        };

        assert!(FinalizationService::new(ledger.clone(), "node-1").finalize(&broadcast).await.unwrap());
        assert!(!FinalizationService::new(ledger.clone(), "node-2").finalize(&broadcast).await.unwrap());

        let record: FinalizationRecord = ledger
            .read_one(Namespace::Finalizations, &d.withdrawal_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.fee_sat, 250);
        assert_eq!(record.amount_sat, 40_000);
        assert_eq!(record.source_account, "alice@d3");
    }
}
