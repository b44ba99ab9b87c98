//! Broadcasts Provider
//!
//! The broadcast fact is the saga's idempotency fence: every handler reads
//! it before acting and it is written once, after the network accepted the
//! transaction. There is no delete path, so Done never reverts.
//!
//! A rollback record from any validator closes the same fence from the
//! other side: once one exists, nothing is signed or relayed for that id.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::Result;
use crate::ledger::{is_duplicate, Ledger};
use crate::types::{BroadcastRecord, FenceState, Namespace, WithdrawalDetails, WithdrawalId};

#[async_trait]
pub trait BroadcastsProvider: Send + Sync {
    async fn has_been_broadcast(&self, details: &WithdrawalDetails) -> Result<bool>;

    /// Any validator posted a rollback record for the id
    async fn has_been_rolled_back(&self, withdrawal_id: &WithdrawalId) -> Result<bool>;

    /// Broadcast or rolled back; the saga is over either way
    async fn is_settled(&self, details: &WithdrawalDetails) -> Result<bool> {
        if self.has_been_broadcast(details).await? {
            return Ok(true);
        }
        self.has_been_rolled_back(&details.withdrawal_id()).await
    }

    /// Fence state as seen by this node
    async fn state(&self, withdrawal_id: &WithdrawalId) -> Result<FenceState>;

    /// Claim the local in-flight slot; `false` if in flight or done
    async fn try_begin(&self, withdrawal_id: &WithdrawalId) -> Result<bool>;

    /// Release the in-flight slot
    async fn finish(&self, withdrawal_id: &WithdrawalId);

    /// Record the broadcast fact
    async fn mark_as_broadcast(&self, details: &WithdrawalDetails, btc_txid: &str) -> Result<()>;
}

/// Broadcast fence over ledger facts plus a local in-flight set
pub struct LedgerBroadcasts {
    ledger: Ledger,
    node_id: String,
    in_flight: Mutex<HashSet<WithdrawalId>>,
}

impl LedgerBroadcasts {
    pub fn new(ledger: Ledger, node_id: impl Into<String>) -> Self {
        Self {
            ledger,
            node_id: node_id.into(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn record(&self, withdrawal_id: &WithdrawalId) -> Result<Option<BroadcastRecord>> {
        self.ledger.read_one(Namespace::Broadcasts, withdrawal_id).await
    }
}

#[async_trait]
impl BroadcastsProvider for LedgerBroadcasts {
    async fn has_been_broadcast(&self, details: &WithdrawalDetails) -> Result<bool> {
        self.ledger.exists(Namespace::Broadcasts, &details.withdrawal_id()).await
    }

    async fn has_been_rolled_back(&self, withdrawal_id: &WithdrawalId) -> Result<bool> {
        self.ledger.exists(Namespace::Rollbacks, withdrawal_id).await
    }

    async fn state(&self, withdrawal_id: &WithdrawalId) -> Result<FenceState> {
        if self.ledger.exists(Namespace::Broadcasts, withdrawal_id).await? {
            return Ok(FenceState::Done);
        }
        if self.has_been_rolled_back(withdrawal_id).await? {
            return Ok(FenceState::RolledBack);
        }
        if self.in_flight.lock().await.contains(withdrawal_id) {
            return Ok(FenceState::InProgress);
        }
        Ok(FenceState::NotStarted)
    }

    async fn try_begin(&self, withdrawal_id: &WithdrawalId) -> Result<bool> {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(withdrawal_id) {
            return Ok(false);
        }
        if self.ledger.exists(Namespace::Broadcasts, withdrawal_id).await? {
            return Ok(false);
        }
        if self.has_been_rolled_back(withdrawal_id).await? {
            debug!(withdrawal_id = %withdrawal_id, "Rolled back, not broadcasting");
            return Ok(false);
        }
        in_flight.insert(withdrawal_id.clone());
        Ok(true)
    }

    async fn finish(&self, withdrawal_id: &WithdrawalId) {
        self.in_flight.lock().await.remove(withdrawal_id);
    }

    async fn mark_as_broadcast(&self, details: &WithdrawalDetails, btc_txid: &str) -> Result<()> {
        let id = details.withdrawal_id();
        let record = BroadcastRecord {
            withdrawal_id: id.clone(),
            details: details.clone(),
            btc_txid: btc_txid.to_string(),
        };

        match self.ledger.put_once(Namespace::Broadcasts, &id, &self.node_id, &record).await {
            Ok(_) => {
                info!(target: "bridge::broadcast", withdrawal_id = %id, txid = btc_txid, "Broadcast recorded");
                Ok(())
            }
            Err(e) if is_duplicate(&e) => {
                debug!(withdrawal_id = %id, "Broadcast already recorded by another node");
                Ok(())
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
    use crate::types::RollbackRecord;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fence_states() {
        let ledger = Ledger::new(Arc::new(MemoryFactStore::new()));
        let broadcasts = LedgerBroadcasts::new(ledger.clone(), "node-1");
        let d = details(40_000);
        let id = d.withdrawal_id();

        assert_eq!(broadcasts.state(&id).await.unwrap(), FenceState::NotStarted);
        assert!(broadcasts.try_begin(&id).await.unwrap());
        assert!(!broadcasts.try_begin(&id).await.unwrap());
        assert_eq!(broadcasts.state(&id).await.unwrap(), FenceState::InProgress);

        broadcasts.mark_as_broadcast(&d, "txid").await.unwrap();
        broadcasts.finish(&id).await;
        assert_eq!(broadcasts.state(&id).await.unwrap(), FenceState::Done);
        assert!(broadcasts.has_been_broadcast(&d).await.unwrap());
        assert!(!broadcasts.try_begin(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rollback_closes_the_fence() {
        let ledger = Ledger::new(Arc::new(MemoryFactStore::new()));
        let broadcasts = LedgerBroadcasts::new(ledger.clone(), "node-1");
        let d = details(40_000);
        let id = d.withdrawal_id();

        let record = RollbackRecord {
            withdrawal_id: id.clone(),
            reason: "no fee data".to_string(),
            details: Some(d.clone()),
            utxos: Vec::new(),
            created_at: 0,
        };
        ledger.put(Namespace::Rollbacks, &id, "node-3", &record).await.unwrap();

        assert_eq!(broadcasts.state(&id).await.unwrap(), FenceState::RolledBack);
        assert!(broadcasts.has_been_rolled_back(&id).await.unwrap());
        assert!(broadcasts.is_settled(&d).await.unwrap());
        assert!(!broadcasts.has_been_broadcast(&d).await.unwrap());
        assert!(!broadcasts.try_begin(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_mark_is_harmless() {
        let ledger = Ledger::new(Arc::new(MemoryFactStore::new()));
        let node1 = LedgerBroadcasts::new(ledger.clone(), "node-1");
        let node2 = LedgerBroadcasts::new(ledger, "node-2");
        let d = details(40_000);

        node1.mark_as_broadcast(&d, "first").await.unwrap();
        node2.mark_as_broadcast(&d, "second").await.unwrap();

        let record = node2.record(&d.withdrawal_id()).await.unwrap().unwrap();
        assert_eq!(record.btc_txid, "first");
    }
}
