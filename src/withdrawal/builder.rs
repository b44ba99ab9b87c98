//! Withdrawal Transaction Builder
//!
//! Materializes the agreed UTXO set into an unsigned transaction. The output
//! is a pure function of the withdrawal and its inputs, so every validator
//! that materializes the same consensus builds the same bytes.

use bitcoin::{
    absolute::LockTime,
    transaction::Version,
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use std::str::FromStr;

use super::fee::{is_dust, tx_fee};
use super::signer::MultisigWallet;
use crate::types::{total_value, TransactionRecord, UnspentOutput, WithdrawalDetails};

/// Builds unsigned withdrawal transactions
#[derive(Debug, Clone)]
pub struct TransactionCreator {
    network: Network,
    /// Where change goes
    change_script: ScriptBuf,
}

impl TransactionCreator {
    pub fn new(wallet: &MultisigWallet) -> Self {
        Self {
            network: wallet.network(),
            change_script: wallet.script_pubkey(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Validate a Bitcoin address for this network
    pub fn validate_address(&self, address: &str) -> Result<Address, BuilderError> {
        Address::from_str(address.trim())
            .map_err(|e| BuilderError::InvalidAddress(e.to_string()))?
            .require_network(self.network)
            .map_err(|e| BuilderError::InvalidAddress(e.to_string()))
    }

    /// Build the unsigned transaction paying `details` from `utxos`
    ///
    /// Inputs are sorted by outpoint. Output 0 pays the full amount to the
    /// destination; output 1 returns change to the multisig unless dust, in
    /// which case the remainder goes to the miner.
    pub fn build(
        &self,
        details: &WithdrawalDetails,
        utxos: &[UnspentOutput],
        fee_rate: u64,
    ) -> Result<TransactionRecord, BuilderError> {
        if utxos.is_empty() {
            return Err(BuilderError::NoUtxos);
        }
        if details.amount_sat == 0 {
            return Err(BuilderError::AmountTooSmall);
        }

        let dest_address = self.validate_address(&details.destination_address)?;

        let mut inputs = utxos.to_vec();
        inputs.sort_by_key(UnspentOutput::outpoint);
        inputs.dedup_by_key(|u| u.outpoint());

        let total_input = total_value(&inputs);
        let fee_without_change = tx_fee(inputs.len(), 1, fee_rate);
        let required = details.amount_sat.saturating_add(fee_without_change);
        if total_input < required || required == u64::MAX {
            return Err(BuilderError::InsufficientFunds {
                required,
                available: total_input,
            });
        }

        let fee_with_change = tx_fee(inputs.len(), 2, fee_rate);
        let change = total_input.saturating_sub(details.amount_sat.saturating_add(fee_with_change));
        let (change, fee) = if change > 0 && !is_dust(change, fee_rate) {
            (change, fee_with_change)
        } else {
            (0, total_input - details.amount_sat)
        };

        let tx_inputs = inputs
            .iter()
            .map(|utxo| {
                let txid = Txid::from_str(&utxo.txid)
                    .map_err(|e| BuilderError::InvalidTxid(e.to_string()))?;

                Ok(TxIn {
                    previous_output: OutPoint {
                        txid,
                        vout: utxo.vout,
                    },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<Vec<TxIn>, BuilderError>>()?;

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(details.amount_sat),
            script_pubkey: dest_address.script_pubkey(),
        }];
        if change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: self.change_script.clone(),
            });
        }

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: tx_inputs,
            output: outputs,
        };

        Ok(TransactionRecord::new(details.clone(), inputs, &tx, fee, change))
    }
}

/// Builder errors
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid txid: {0}")]
    InvalidTxid(String),

    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("no UTXOs provided")]
    NoUtxos,

    #[error("amount too small")]
    AmountTooSmall,
}
