//! Withdrawal Tracker
//!
//! Read model of the saga rebuilt from ledger facts on every query. Nothing
//! is cached, so a restarted node reports the same state as a running one.

use std::fmt;

use crate::common::Result;
use crate::ledger::Ledger;
use crate::types::{
    common_consensus, BroadcastRecord, Namespace, QuorumOutcome, RollbackRecord, SagaState,
    WithdrawalConsensus, WithdrawalId,
};

/// Saga state of one withdrawal plus the facts behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReport {
    pub withdrawal_id: WithdrawalId,
    pub state: SagaState,
    pub proposals: usize,
    pub largest_group: usize,
    /// Every validator proposed and no set can reach quorum
    pub diverged: bool,
    pub signatures: usize,
    pub btc_txid: Option<String>,
    pub rollback_reason: Option<String>,
    pub finalized: bool,
}

impl fmt::Display for WithdrawalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.withdrawal_id, self.state)?;
        if self.proposals > 0 {
            write!(f, " | proposals {} (largest group {})", self.proposals, self.largest_group)?;
        }
        if self.diverged {
            write!(f, " | pending: consensus diverged")?;
        }
        if self.signatures > 0 {
            write!(f, " | signatures {}", self.signatures)?;
        }
        if let Some(txid) = &self.btc_txid {
            write!(f, " | txid {}", txid)?;
        }
        if let Some(reason) = &self.rollback_reason {
            write!(f, " | withdrawal failed: {}", reason)?;
        }
        if self.finalized {
            write!(f, " | finalized")?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct WithdrawalTracker {
    ledger: Ledger,
    quorum: usize,
    validators: usize,
}

impl WithdrawalTracker {
    pub fn new(ledger: Ledger, quorum: usize, validators: usize) -> Self {
        Self {
            ledger,
            quorum,
            validators,
        }
    }

    pub async fn state(&self, withdrawal_id: &WithdrawalId) -> Result<SagaState> {
        Ok(self.report(withdrawal_id).await?.state)
    }

    pub async fn report(&self, withdrawal_id: &WithdrawalId) -> Result<WithdrawalReport> {
        let id = withdrawal_id;
        let broadcast: Option<BroadcastRecord> = self.ledger.read_one(Namespace::Broadcasts, id).await?;
        let rollback: Option<RollbackRecord> = self.ledger.read_one(Namespace::Rollbacks, id).await?;
        let signatures = self.ledger.store().get(Namespace::SignatureCollection, id).await?.len();
        let transaction = self.ledger.exists(Namespace::Transactions, id).await?;
        let established = self.ledger.exists(Namespace::Established, id).await?;
        let finalized = self.ledger.exists(Namespace::Finalizations, id).await?;
        let proposals: Vec<WithdrawalConsensus> = self
            .ledger
            .read::<WithdrawalConsensus>(Namespace::Consensus, id)
            .await?
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| p.is_for(id))
            .collect();

        let (largest_group, diverged) = match common_consensus(&proposals, self.quorum, self.validators) {
            QuorumOutcome::Reached(agreed) => (proposals.iter().filter(|p| p.agrees_with(&agreed)).count(), false),
            QuorumOutcome::Pending { largest_group, .. } => (largest_group, false),
            QuorumOutcome::Diverged { largest_group, .. } => (largest_group, !proposals.is_empty()),
        };

        let state = if broadcast.is_some() {
            SagaState::Broadcast
        } else if rollback.is_some() {
            SagaState::RolledBack
        } else if signatures > 0 {
            SagaState::Signing
        } else if transaction {
            SagaState::TransactionCreated
        } else if established {
            SagaState::ConsensusEstablished
        } else if !proposals.is_empty() {
            SagaState::ConsensusProposed
        } else {
            SagaState::Requested
        };

        Ok(WithdrawalReport {
            withdrawal_id: id.clone(),
            state,
            proposals: proposals.len(),
            largest_group,
            diverged: diverged && !state.is_terminal(),
            signatures,
            btc_txid: broadcast.map(|b| b.btc_txid),
            rollback_reason: rollback.map(|r| r.reason),
            finalized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryFactStore;
    use crate::testing::{details, utxo};
    use std::sync::Arc;

    fn proposal(txid: &str) -> WithdrawalConsensus {
        WithdrawalConsensus::new(details(40_000), vec![utxo(txid, 0, 100_000, 6)], 800)
    }

    #[tokio::test]
    async fn test_state_progression() {
        let ledger = Ledger::new(Arc::new(MemoryFactStore::new()));
        let tracker = WithdrawalTracker::new(ledger.clone(), 2, 3);
        let d = details(40_000);
        let id = d.withdrawal_id();

        assert_eq!(tracker.state(&id).await.unwrap(), SagaState::Requested);

        ledger.put(Namespace::Consensus, &id, "node-1", &proposal("aa")).await.unwrap();
        assert_eq!(tracker.state(&id).await.unwrap(), SagaState::ConsensusProposed);

        ledger.put_once(Namespace::Established, &id, "node-1", &true).await.unwrap();
        assert_eq!(tracker.state(&id).await.unwrap(), SagaState::ConsensusEstablished);

        ledger.put(Namespace::SignatureCollection, &id, "key-1", &"sig").await.unwrap();
        assert_eq!(tracker.state(&id).await.unwrap(), SagaState::Signing);

        let record = BroadcastRecord {
            withdrawal_id: id.clone(),
            details: d,
            btc_txid: "cd".repeat(32),
        };
        ledger.put_once(Namespace::Broadcasts, &id, "node-1", &record).await.unwrap();
        let report = tracker.report(&id).await.unwrap();
        assert_eq!(report.state, SagaState::Broadcast);
        assert_eq!(report.btc_txid, Some("cd".repeat(32)));
    }

    #[tokio::test]
    async fn test_divergence_is_pending() {
        let ledger = Ledger::new(Arc::new(MemoryFactStore::new()));
        let tracker = WithdrawalTracker::new(ledger.clone(), 2, 3);
        let id = details(40_000).withdrawal_id();

        for (node, txid) in [("node-1", "aa"), ("node-2", "bb"), ("node-3", "cc")] {
            ledger.put(Namespace::Consensus, &id, node, &proposal(txid)).await.unwrap();
        }

        let report = tracker.report(&id).await.unwrap();
        assert_eq!(report.state, SagaState::ConsensusProposed);
        assert!(report.diverged);
        assert_eq!(report.largest_group, 1);
        assert!(report.to_string().contains("consensus diverged"));
    }
}
