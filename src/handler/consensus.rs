//! New Consensus Data Handler
//!
//! Runs on every proposal from every validator. Only the first observer of
//! a quorum materializes the transaction; the established marker keeps the
//! rest from acting. A withdrawal that was already rolled back or broadcast
//! is never materialized.

use std::sync::Arc;
use tracing::debug;

use crate::types::WithdrawalId;
use crate::withdrawal::{
    BroadcastsProvider, ConsensusProvider, RollbackService, WithdrawOutcome, WithdrawalStats,
};

pub struct NewConsensusDataHandler {
    consensus: Arc<dyn ConsensusProvider>,
    broadcasts: Arc<dyn BroadcastsProvider>,
    rollback: Arc<dyn RollbackService>,
    stats: Arc<WithdrawalStats>,
}

impl NewConsensusDataHandler {
    pub fn new(
        consensus: Arc<dyn ConsensusProvider>,
        broadcasts: Arc<dyn BroadcastsProvider>,
        rollback: Arc<dyn RollbackService>,
        stats: Arc<WithdrawalStats>,
    ) -> Self {
        Self {
            consensus,
            broadcasts,
            rollback,
            stats,
        }
    }

    pub async fn handle(&self, withdrawal_id: &WithdrawalId) {
        let (details, proposals) = match self.consensus.get_consensus(withdrawal_id).await {
            Ok(consensus) => consensus,
            Err(e) => {
                self.rollback.rollback(withdrawal_id, None, &e.to_string()).await;
                return;
            }
        };

        match self.broadcasts.is_settled(&details).await {
            Ok(true) => {
                debug!(withdrawal_id = %withdrawal_id, "Withdrawal already settled");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.rollback.rollback(withdrawal_id, Some(&details), &e.to_string()).await;
                return;
            }
        }

        match self.consensus.has_been_established(withdrawal_id).await {
            Ok(true) => {
                debug!(withdrawal_id = %withdrawal_id, "Consensus already established");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.rollback.rollback(withdrawal_id, Some(&details), &e.to_string()).await;
                return;
            }
        }

        match self.consensus.withdraw(&details, &proposals).await {
            Ok(WithdrawOutcome::Materialized(_)) => self.stats.record_transaction_created(),
            // Pending waits for more proposals, divergence waits for an operator
            Ok(_) => {}
            Err(e) => self.rollback.rollback(withdrawal_id, Some(&details), &e.to_string()).await,
        }
    }
}
