//! Withdrawal Transaction Record
//!
//! Stored once per withdrawal id when consensus materialises.

use bitcoin::Transaction;
use serde::{Deserialize, Serialize};

use super::utxo::UnspentOutput;
use super::withdrawal::{WithdrawalDetails, WithdrawalId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub withdrawal_id: WithdrawalId,
    pub details: WithdrawalDetails,
    /// Spent outputs in input order
    pub inputs: Vec<UnspentOutput>,
    /// Consensus-encoded unsigned transaction, hex
    pub unsigned_tx: String,
    pub fee_sat: u64,
    /// Change returned to the bridge wallet (0 when dropped as dust)
    pub change_sat: u64,
}

impl TransactionRecord {
    pub fn new(
        details: WithdrawalDetails,
        inputs: Vec<UnspentOutput>,
        tx: &Transaction,
        fee_sat: u64,
        change_sat: u64,
    ) -> Self {
        Self {
            withdrawal_id: details.withdrawal_id(),
            details,
            inputs,
            unsigned_tx: bitcoin::consensus::encode::serialize_hex(tx),
            fee_sat,
            change_sat,
        }
    }

    /// Decode the stored transaction
    pub fn transaction(&self) -> Result<Transaction, TxDecodeError> {
        let bytes = hex::decode(&self.unsigned_tx).map_err(|e| TxDecodeError(e.to_string()))?;
        bitcoin::consensus::deserialize(&bytes).map_err(|e| TxDecodeError(e.to_string()))
    }

    pub fn txid(&self) -> Result<String, TxDecodeError> {
        Ok(self.transaction()?.compute_txid().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot decode stored transaction: {0}")]
pub struct TxDecodeError(pub String);
