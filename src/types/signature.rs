//! Signature Contribution Types

use serde::{Deserialize, Serialize};

use super::withdrawal::WithdrawalId;

/// Signature over one transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSignature {
    pub input_index: usize,
    /// DER signature followed by the sighash byte, hex encoded
    pub signature: String,
}

/// One validator's signatures for every input of a withdrawal transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureContribution {
    pub withdrawal_id: WithdrawalId,
    /// Compressed public key of the signing validator, hex encoded
    pub signer_pubkey: String,
    pub signatures: Vec<InputSignature>,
}

impl SignatureContribution {
    /// Signature for `input_index`, if this contribution covers it
    pub fn for_input(&self, input_index: usize) -> Option<&InputSignature> {
        self.signatures.iter().find(|s| s.input_index == input_index)
    }
}
