//! Withdrawal Consensus Provider
//!
//! Every validator selects UTXOs for a withdrawal on its own and posts the
//! selection as a proposal. Once `quorum` proposals name the same outpoint
//! set, the first node to notice materializes the transaction.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::builder::TransactionCreator;
use super::fee::SharedFeeRate;
use super::tx_storage::TransactionStorage;
use super::utxo::{UtxoError, UtxoProvider};
use crate::common::{BridgeError, Result};
use crate::ledger::{is_duplicate, Ledger};
use crate::types::{
    common_consensus, Namespace, QuorumOutcome, TransactionRecord, UtxoRef, WithdrawalConsensus,
    WithdrawalDetails, WithdrawalId,
};

/// Result of a materialization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    /// This node wrote the transaction record
    Materialized(TransactionRecord),
    /// Another node got there first
    AlreadyMaterialized,
    /// Not enough equal proposals yet
    Pending,
    /// Proposals can no longer reach quorum
    Diverged { proposals: usize, largest_group: usize },
}

#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    /// Select and reserve UTXOs, then post this node's proposal
    async fn create_consensus_data(&self, details: &WithdrawalDetails) -> Result<()>;

    /// Every proposal posted so far; the details come from the first one
    async fn get_consensus(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<(WithdrawalDetails, Vec<WithdrawalConsensus>)>;

    /// Whether the transaction has been materialized
    async fn has_been_established(&self, withdrawal_id: &WithdrawalId) -> Result<bool>;

    /// Materialize the transaction if the proposals reach quorum
    async fn withdraw(
        &self,
        details: &WithdrawalDetails,
        consensus: &[WithdrawalConsensus],
    ) -> Result<WithdrawOutcome>;
}

/// Consensus over ledger facts
pub struct LedgerConsensusProvider {
    ledger: Ledger,
    node_id: String,
    utxos: Arc<dyn UtxoProvider>,
    tx_storage: Arc<dyn TransactionStorage>,
    creator: TransactionCreator,
    fee_rate: SharedFeeRate,
    quorum: usize,
    validators: usize,
    min_confirmations: u32,
}

impl LedgerConsensusProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Ledger,
        node_id: impl Into<String>,
        utxos: Arc<dyn UtxoProvider>,
        tx_storage: Arc<dyn TransactionStorage>,
        creator: TransactionCreator,
        fee_rate: SharedFeeRate,
        quorum: usize,
        validators: usize,
        min_confirmations: u32,
    ) -> Self {
        Self {
            ledger,
            node_id: node_id.into(),
            utxos,
            tx_storage,
            creator,
            fee_rate,
            quorum,
            validators,
            min_confirmations,
        }
    }

    /// Our proposal was already posted; keep the reservation on what we proposed
    async fn keep_posted_proposal(&self, id: &WithdrawalId) -> Result<()> {
        let posted = self
            .ledger
            .read::<WithdrawalConsensus>(Namespace::Consensus, id)
            .await?
            .into_iter()
            .find(|(author, _)| *author == self.node_id);
        if let Some((_, proposal)) = posted {
            self.utxos.register_unspents(id, &proposal.selected_utxos).await?;
        }
        debug!(withdrawal_id = %id, "Proposal already posted");
        Ok(())
    }
}

#[async_trait]
impl ConsensusProvider for LedgerConsensusProvider {
    async fn create_consensus_data(&self, details: &WithdrawalDetails) -> Result<()> {
        let id = details.withdrawal_id();
        let selection = self.utxos.select_and_reserve(details, self.min_confirmations).await?;
        let proposal = WithdrawalConsensus::new(details.clone(), selection.utxos, selection.available_height);

        match self
            .ledger
            .put(Namespace::Consensus, &id, &self.node_id, &proposal)
            .await
        {
            Ok(_) => {
                info!(
                    withdrawal_id = %id,
                    inputs = proposal.selected_utxos.len(),
                    height = proposal.available_height,
                    "Consensus proposal posted"
                );
                Ok(())
            }
            Err(e) if is_duplicate(&e) => self.keep_posted_proposal(&id).await,
            Err(e) => {
                // Nothing was posted, so nothing may stay reserved
                let reserved: Vec<UtxoRef> = proposal.utxo_set().into_iter().collect();
                if let Err(release) = self.utxos.unregister_unspents(&id, &reserved).await {
                    warn!(withdrawal_id = %id, error = %release, "Could not release reservation");
                }
                Err(e)
            }
        }
    }

    async fn get_consensus(
        &self,
        withdrawal_id: &WithdrawalId,
    ) -> Result<(WithdrawalDetails, Vec<WithdrawalConsensus>)> {
        let mut proposals = Vec::new();
        for (author, proposal) in self
            .ledger
            .read::<WithdrawalConsensus>(Namespace::Consensus, withdrawal_id)
            .await?
        {
            if proposal.is_for(withdrawal_id) {
                proposals.push(proposal);
            } else {
                warn!(
                    target: "bridge::consensus",
                    withdrawal_id = %withdrawal_id,
                    author = %author,
                    "Ignoring proposal whose details do not match the withdrawal"
                );
            }
        }

        let details = proposals
            .first()
            .map(|p| p.details.clone())
            .ok_or_else(|| BridgeError::internal(format!("no consensus proposals for {}", withdrawal_id)))?;
        Ok((details, proposals))
    }

    async fn has_been_established(&self, withdrawal_id: &WithdrawalId) -> Result<bool> {
        self.ledger.exists(Namespace::Established, withdrawal_id).await
    }

    async fn withdraw(
        &self,
        details: &WithdrawalDetails,
        consensus: &[WithdrawalConsensus],
    ) -> Result<WithdrawOutcome> {
        let id = details.withdrawal_id();
        let consensus: Vec<WithdrawalConsensus> =
            consensus.iter().filter(|p| p.is_for(&id)).cloned().collect();

        let agreed = match common_consensus(&consensus, self.quorum, self.validators) {
            QuorumOutcome::Reached(agreed) => agreed,
            QuorumOutcome::Pending {
                proposals,
                largest_group,
            } => {
                debug!(withdrawal_id = %id, proposals, largest_group, quorum = self.quorum, "Waiting for quorum");
                return Ok(WithdrawOutcome::Pending);
            }
            QuorumOutcome::Diverged {
                proposals,
                largest_group,
            } => {
                warn!(
                    target: "bridge::consensus",
                    withdrawal_id = %id,
                    proposals,
                    largest_group,
                    quorum = self.quorum,
                    "Validators proposed different UTXO sets; withdrawal stalls until an operator intervenes"
                );
                return Ok(WithdrawOutcome::Diverged {
                    proposals,
                    largest_group,
                });
            }
        };

        let fee_rate = self.fee_rate.current().ok_or(UtxoError::NoFeeRate)?;
        let record = self
            .creator
            .build(&agreed.details, &agreed.selected_utxos, fee_rate)
            .map_err(BridgeError::from)?;

        let created = self.tx_storage.save(&record).await?;

        match self.ledger.put_once(Namespace::Established, &id, &self.node_id, &true).await {
            Ok(_) => {}
            Err(e) if is_duplicate(&e) => {}
            Err(e) => return Err(e),
        }

        if created {
            info!(
                target: "bridge::consensus",
                withdrawal_id = %id,
                inputs = record.inputs.len(),
                fee = record.fee_sat,
                change = record.change_sat,
                "Consensus established, transaction created"
            );
            Ok(WithdrawOutcome::Materialized(record))
        } else {
            Ok(WithdrawOutcome::AlreadyMaterialized)
        }
    }
}
