//! Unspent Output Types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outpoint reference `txid:vout`
///
/// Orders by txid then vout, which is also the canonical input order of a
/// withdrawal transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoRef {
    pub txid: String,
    pub vout: u32,
}

impl UtxoRef {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Wallet output as seen by the UTXO query surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnspentOutput {
    /// Funding transaction hash
    pub txid: String,
    /// Output index in the funding transaction
    pub vout: u32,
    /// Value in satoshis
    pub value_sat: u64,
    /// Confirmation depth (0 while unconfirmed)
    pub confirmations: u32,
    /// Height of the block that first confirmed the output
    pub block_height: Option<u64>,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> UtxoRef {
        UtxoRef::new(self.txid.clone(), self.vout)
    }
}

/// Sum of output values
pub fn total_value<'a>(outputs: impl IntoIterator<Item = &'a UnspentOutput>) -> u64 {
    outputs
        .into_iter()
        .fold(0u64, |acc, o| acc.saturating_add(o.value_sat))
}
