//! Transfer Handler
//!
//! Entry of the saga: a transfer to the bridge account becomes a withdrawal
//! request and this node's consensus proposal.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::common::{log_withdrawal_event, EventCategory};
use crate::types::{TransferCommand, WithdrawalDetails};
use crate::withdrawal::{
    is_dust, selection_fee, BroadcastsProvider, ConsensusProvider, RollbackService, SharedFeeRate,
    TransactionCreator, WithdrawalStats,
};

pub struct TransferHandler {
    bridge_account: String,
    broadcasts: Arc<dyn BroadcastsProvider>,
    consensus: Arc<dyn ConsensusProvider>,
    rollback: Arc<dyn RollbackService>,
    creator: TransactionCreator,
    fee_rate: SharedFeeRate,
    stats: Arc<WithdrawalStats>,
}

impl TransferHandler {
    pub fn new(
        bridge_account: impl Into<String>,
        broadcasts: Arc<dyn BroadcastsProvider>,
        consensus: Arc<dyn ConsensusProvider>,
        rollback: Arc<dyn RollbackService>,
        creator: TransactionCreator,
        fee_rate: SharedFeeRate,
        stats: Arc<WithdrawalStats>,
    ) -> Self {
        Self {
            bridge_account: bridge_account.into(),
            broadcasts,
            consensus,
            rollback,
            creator,
            fee_rate,
            stats,
        }
    }

    pub async fn handle(&self, transfer: &TransferCommand) {
        if transfer.destination_account != self.bridge_account {
            return;
        }

        if transfer.amount_sat().is_none() || transfer.fee_sat().is_none() {
            warn!(
                source = %transfer.source_account,
                amount = %transfer.amount,
                fee = ?transfer.fee,
                "Ignoring transfer with a malformed amount"
            );
            return;
        }

        let details = transfer.to_details();
        let id = details.withdrawal_id();

        match self.broadcasts.is_settled(&details).await {
            Ok(true) => {
                debug!(withdrawal_id = %id, "Withdrawal already broadcast or rolled back, ignoring transfer");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                self.rollback.rollback(&id, Some(&details), &e.to_string()).await;
                return;
            }
        }

        self.check_and_start_consensus(&details).await;
    }

    /// Validate the request, then propose
    pub async fn check_and_start_consensus(&self, details: &WithdrawalDetails) {
        let id = details.withdrawal_id();

        let Some(fee_rate) = self.fee_rate.current() else {
            self.rollback.rollback(&id, Some(details), "no fee data").await;
            return;
        };

        if self.creator.validate_address(&details.destination_address).is_err() {
            self.rollback.rollback(&id, Some(details), "invalid address").await;
            return;
        }

        let dusty = details
            .amount_sat
            .checked_sub(selection_fee(1, fee_rate))
            .map_or(true, |net| is_dust(net, fee_rate));
        if dusty {
            self.rollback.rollback(&id, Some(details), "dusty amount").await;
            return;
        }

        self.start_consensus_process(details).await;
    }

    async fn start_consensus_process(&self, details: &WithdrawalDetails) {
        let id = details.withdrawal_id();
        match self.consensus.create_consensus_data(details).await {
            Ok(()) => {
                self.stats.record_started();
                info!(
                    target: "bridge::withdrawal",
                    withdrawal_id = %id,
                    amount = details.amount_sat,
                    destination = %details.destination_address,
                    "Withdrawal requested"
                );
                log_withdrawal_event(
                    EventCategory::Withdrawal,
                    "withdrawal_requested",
                    id.as_str(),
                    details.amount_sat,
                    &details.destination_address,
                    true,
                    None,
                    None,
                );
            }
            Err(e) => self.rollback.rollback(&id, Some(details), &e.to_string()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        test_wallet, transfer, FakeBroadcasts, FakeConsensus, FakeRollback, BRIDGE_ACCOUNT,
    };
    use crate::withdrawal::{CurrentFeeRate, StaticFeeRate};
    use std::sync::atomic::Ordering;

    struct Fixture {
        broadcasts: Arc<FakeBroadcasts>,
        consensus: Arc<FakeConsensus>,
        rollback: Arc<FakeRollback>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                broadcasts: Arc::new(FakeBroadcasts::default()),
                consensus: Arc::new(FakeConsensus::default()),
                rollback: Arc::new(FakeRollback::default()),
            }
        }

        fn handler(&self, fee_rate: SharedFeeRate) -> TransferHandler {
            TransferHandler::new(
                BRIDGE_ACCOUNT,
                self.broadcasts.clone(),
                self.consensus.clone(),
                self.rollback.clone(),
                TransactionCreator::new(&test_wallet()),
                fee_rate,
                Arc::new(WithdrawalStats::new()),
            )
        }
    }

    fn rate() -> SharedFeeRate {
        Arc::new(StaticFeeRate(10))
    }

    #[tokio::test]
    async fn test_valid_transfer_starts_consensus() {
        let f = Fixture::new();
        f.handler(rate()).handle(&transfer(40_000)).await;
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_rolled_back_transfer_is_not_restarted() {
        let f = Fixture::new();
        f.broadcasts.set_rolled_back(true);
        f.handler(rate()).handle(&transfer(40_000)).await;
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_other_destination_ignored() {
        let f = Fixture::new();
        let mut cmd = transfer(40_000);
        cmd.destination_account = "bob@d3".to_string();
        f.handler(rate()).handle(&cmd).await;
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_amount_ignored() {
        let f = Fixture::new();
        let mut cmd = transfer(40_000);
        cmd.amount = "1.5".to_string();
        f.handler(rate()).handle(&cmd).await;
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_already_broadcast_ignored() {
        let f = Fixture::new();
        f.broadcasts.set_broadcast(true);
        f.handler(rate()).handle(&transfer(40_000)).await;
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.rollback.calls(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_check_failure_rolls_back() {
        let f = Fixture::new();
        f.broadcasts.fail_check.store(true, Ordering::SeqCst);
        f.handler(rate()).handle(&transfer(40_000)).await;
        assert_eq!(f.rollback.calls(), 1);
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_fee_data() {
        let f = Fixture::new();
        f.handler(Arc::new(CurrentFeeRate::new())).handle(&transfer(40_000)).await;
        assert_eq!(f.rollback.reasons(), vec!["no fee data".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let f = Fixture::new();
        let mut cmd = transfer(40_000);
        cmd.description = "not-an-address".to_string();
        f.handler(rate()).handle(&cmd).await;
        assert_eq!(f.rollback.reasons(), vec!["invalid address".to_string()]);
    }

    #[tokio::test]
    async fn test_dusty_amount() {
        let f = Fixture::new();
        // 2580 fee + 1799 left is below the 1800 dust threshold
        f.handler(rate()).handle(&transfer(2_580 + 1_799)).await;
        f.handler(rate()).handle(&transfer(1_000)).await;
        assert_eq!(f.rollback.reasons(), vec!["dusty amount".to_string(), "dusty amount".to_string()]);

        f.handler(rate()).handle(&transfer(2_580 + 1_800)).await;
        assert_eq!(f.consensus.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_consensus_failure_rolls_back_with_reason() {
        let f = Fixture::new();
        f.consensus.fail_create.store(true, Ordering::SeqCst);
        f.handler(rate()).handle(&transfer(40_000)).await;
        assert_eq!(f.rollback.calls(), 1);
        assert!(f.rollback.reasons()[0].contains("insufficient funds"));
    }
}
