//! Rollback Handler
//!
//! A rollback posted by any validator frees this node's reservations for
//! the same withdrawal.

use std::sync::Arc;
use tracing::info;

use crate::types::WithdrawalId;
use crate::withdrawal::{release_reservations, UtxoProvider};

pub struct RollbackHandler {
    utxos: Arc<dyn UtxoProvider>,
}

impl RollbackHandler {
    pub fn new(utxos: Arc<dyn UtxoProvider>) -> Self {
        Self { utxos }
    }

    pub async fn handle(&self, withdrawal_id: &WithdrawalId, author: &str) {
        let released = release_reservations(self.utxos.as_ref(), withdrawal_id).await;
        if !released.is_empty() {
            info!(
                target: "bridge::rollback",
                withdrawal_id = %withdrawal_id,
                author,
                released = released.len(),
                "Released reservations after rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{details, utxo, FakeUtxoProvider};

    #[tokio::test]
    async fn test_releases_only_that_withdrawal() {
        let utxos = Arc::new(FakeUtxoProvider::with_selection(vec![utxo("aa", 0, 50_000, 6)]));
        let rolled_back = details(40_000);
        let other = details(41_000);
        utxos.select_and_reserve(&rolled_back, 6).await.unwrap();
        utxos
            .register_unspents(&other.withdrawal_id(), &[utxo("bb", 0, 60_000, 6)])
            .await
            .unwrap();

        RollbackHandler::new(utxos.clone())
            .handle(&rolled_back.withdrawal_id(), "node-2")
            .await;

        assert!(utxos.reserved_for(&rolled_back.withdrawal_id()).await.unwrap().is_empty());
        assert_eq!(utxos.reserved_for(&other.withdrawal_id()).await.unwrap().len(), 1);
    }
}
