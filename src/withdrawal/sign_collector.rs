//! Signature Collection
//!
//! Each validator appends one contribution per withdrawal, signing every
//! input with its multisig share. Contributions accumulate on the ledger
//! until `threshold` of them can be merged.

use async_trait::async_trait;
use bitcoin::Transaction;
use tracing::{debug, info};

use super::signer::{MultisigSigner, MultisigWallet};
use crate::common::Result;
use crate::ledger::{is_duplicate, Ledger};
use crate::types::{Namespace, SignatureContribution, TransactionRecord, WithdrawalId};

#[async_trait]
pub trait SignCollector: Send + Sync {
    /// Sign the stored transaction and append this node's contribution
    async fn sign_and_save(&self, record: &TransactionRecord) -> Result<()>;

    async fn get_signatures(&self, withdrawal_id: &WithdrawalId) -> Result<Vec<SignatureContribution>>;

    /// Signatures required per input
    fn threshold(&self) -> usize;

    /// Fully signed transaction, or an error while below threshold
    fn merge(&self, record: &TransactionRecord, contributions: &[SignatureContribution]) -> Result<Transaction>;
}

pub struct LedgerSignCollector {
    ledger: Ledger,
    signer: MultisigSigner,
    wallet: MultisigWallet,
}

impl LedgerSignCollector {
    pub fn new(ledger: Ledger, signer: MultisigSigner, wallet: MultisigWallet) -> Self {
        Self { ledger, signer, wallet }
    }
}

#[async_trait]
impl SignCollector for LedgerSignCollector {
    async fn sign_and_save(&self, record: &TransactionRecord) -> Result<()> {
        let tx = record.transaction()?;
        let contribution =
            self.signer
                .contribution(&record.withdrawal_id, &self.wallet, &tx, &record.inputs)?;

        match self
            .ledger
            .put(
                Namespace::SignatureCollection,
                &record.withdrawal_id,
                &contribution.signer_pubkey,
                &contribution,
            )
            .await
        {
            Ok(_) => {
                info!(
                    target: "bridge::signing",
                    withdrawal_id = %record.withdrawal_id,
                    signer = %contribution.signer_pubkey,
                    inputs = contribution.signatures.len(),
                    "Signature contribution posted"
                );
                Ok(())
            }
            Err(e) if is_duplicate(&e) => {
                debug!(withdrawal_id = %record.withdrawal_id, "Already signed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_signatures(&self, withdrawal_id: &WithdrawalId) -> Result<Vec<SignatureContribution>> {
        Ok(self
            .ledger
            .read::<SignatureContribution>(Namespace::SignatureCollection, withdrawal_id)
            .await?
            .into_iter()
            .map(|(_, contribution)| contribution)
            .collect())
    }

    fn threshold(&self) -> usize {
        self.wallet.threshold()
    }

    fn merge(&self, record: &TransactionRecord, contributions: &[SignatureContribution]) -> Result<Transaction> {
        let tx = record.transaction()?;
        Ok(self.wallet.finalize(&tx, &record.inputs, contributions)?)
    }
}
