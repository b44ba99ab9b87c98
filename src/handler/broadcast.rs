//! Broadcast Recorded Handler
//!
//! Settles the ledger side of a broadcast withdrawal.

use std::sync::Arc;
use tracing::{error, warn};

use crate::ledger::Ledger;
use crate::types::{BroadcastRecord, Namespace, WithdrawalId};
use crate::withdrawal::{FinalizationService, WithdrawalStats};

pub struct BroadcastRecordedHandler {
    ledger: Ledger,
    finalizer: FinalizationService,
    stats: Arc<WithdrawalStats>,
}

impl BroadcastRecordedHandler {
    pub fn new(ledger: Ledger, finalizer: FinalizationService, stats: Arc<WithdrawalStats>) -> Self {
        Self {
            ledger,
            finalizer,
            stats,
        }
    }

    pub async fn handle(&self, withdrawal_id: &WithdrawalId) {
        let record = match self
            .ledger
            .read_one::<BroadcastRecord>(Namespace::Broadcasts, withdrawal_id)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(withdrawal_id = %withdrawal_id, "Broadcast event without a record");
                return;
            }
            Err(e) => {
                error!(withdrawal_id = %withdrawal_id, error = %e, "Could not read broadcast record");
                return;
            }
        };

        match self.finalizer.finalize(&record).await {
            Ok(true) => self.stats.record_finalized(),
            Ok(false) => {}
            Err(e) => error!(withdrawal_id = %withdrawal_id, error = %e, "Finalization failed"),
        }
    }
}
