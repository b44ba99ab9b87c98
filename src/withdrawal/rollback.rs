//! Rollback Service
//!
//! Compensation for a withdrawal that cannot proceed: release this node's
//! UTXO reservations and post a rollback record for auditors. Rollback is
//! best-effort. Failures are logged and never surface to the caller.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::broadcasts::BroadcastsProvider;
use super::stats::WithdrawalStats;
use super::utxo::UtxoProvider;
use crate::common::{log_withdrawal_event, EventCategory};
use crate::ledger::{is_duplicate, Ledger};
use crate::types::{FenceState, Namespace, RollbackRecord, WithdrawalDetails, WithdrawalId};

#[async_trait]
pub trait RollbackService: Send + Sync {
    /// Roll back a withdrawal; details are attached to the record when known
    async fn rollback(&self, withdrawal_id: &WithdrawalId, details: Option<&WithdrawalDetails>, reason: &str);
}

pub struct BtcRollbackService {
    ledger: Ledger,
    node_id: String,
    utxos: Arc<dyn UtxoProvider>,
    broadcasts: Arc<dyn BroadcastsProvider>,
    stats: Arc<WithdrawalStats>,
}

impl BtcRollbackService {
    pub fn new(
        ledger: Ledger,
        node_id: impl Into<String>,
        utxos: Arc<dyn UtxoProvider>,
        broadcasts: Arc<dyn BroadcastsProvider>,
        stats: Arc<WithdrawalStats>,
    ) -> Self {
        Self {
            ledger,
            node_id: node_id.into(),
            utxos,
            broadcasts,
            stats,
        }
    }
}

/// Release every reservation a withdrawal holds on this node
pub async fn release_reservations(utxos: &dyn UtxoProvider, withdrawal_id: &WithdrawalId) -> Vec<crate::types::UtxoRef> {
    let reserved = match utxos.reserved_for(withdrawal_id).await {
        Ok(reserved) => reserved,
        Err(e) => {
            error!(withdrawal_id = %withdrawal_id, error = %e, "Could not read reservations");
            return Vec::new();
        }
    };
    if reserved.is_empty() {
        return reserved;
    }
    if let Err(e) = utxos.unregister_unspents(withdrawal_id, &reserved).await {
        error!(withdrawal_id = %withdrawal_id, error = %e, "Could not release reservations");
    }
    reserved
}

#[async_trait]
impl RollbackService for BtcRollbackService {
    async fn rollback(&self, withdrawal_id: &WithdrawalId, details: Option<&WithdrawalDetails>, reason: &str) {
        match self.broadcasts.state(withdrawal_id).await {
            Ok(FenceState::Done) => {
                warn!(
                    target: "bridge::rollback",
                    withdrawal_id = %withdrawal_id,
                    reason,
                    "Refusing to roll back a broadcast withdrawal"
                );
                return;
            }
            Ok(_) => {}
            // Cannot prove it was broadcast
            Err(e) => warn!(withdrawal_id = %withdrawal_id, error = %e, "Broadcast check failed during rollback"),
        }

        let utxos = release_reservations(self.utxos.as_ref(), withdrawal_id).await;

        let record = RollbackRecord {
            withdrawal_id: withdrawal_id.clone(),
            reason: reason.to_string(),
            details: details.cloned(),
            utxos,
            created_at: chrono::Utc::now().timestamp(),
        };

        match self
            .ledger
            .put(Namespace::Rollbacks, withdrawal_id, &self.node_id, &record)
            .await
        {
            Ok(_) => {}
            Err(e) if is_duplicate(&e) => debug!(withdrawal_id = %withdrawal_id, "Rollback already recorded"),
            Err(e) => error!(
                target: "bridge::rollback",
                withdrawal_id = %withdrawal_id,
                error = %e,
                "Could not record rollback"
            ),
        }

        self.stats.record_rolled_back();
        log_withdrawal_event(
            EventCategory::Rollback,
            "withdrawal_rolled_back",
            withdrawal_id.as_str(),
            details.map(|d| d.amount_sat).unwrap_or(0),
            details.map(|d| d.destination_address.as_str()).unwrap_or(""),
            false,
            None,
            Some(reason),
        );
    }
}
