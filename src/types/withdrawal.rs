//! Withdrawal Request Types
//!
//! A withdrawal is born from a ledger transfer to the bridge account and is
//! identified everywhere by a deterministic id derived from its fields.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the id digest
const WITHDRAWAL_ID_LEN: usize = 32;

/// Deterministic withdrawal identifier
///
/// Every validator derives the same id from the same transfer, so it is the
/// key for all per-withdrawal ledger facts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(String);

impl WithdrawalId {
    /// Wrap an id read back from the ledger
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WithdrawalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Details of a single withdrawal request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WithdrawalDetails {
    /// Ledger account that requested the withdrawal
    pub source_account: String,
    /// Bitcoin address receiving the funds
    pub destination_address: String,
    /// Amount to deliver in satoshis
    pub amount_sat: u64,
    /// Ledger time of the transfer (ms)
    pub request_timestamp: u64,
    /// Index of the transfer command within its ledger transaction
    pub withdrawal_index: u32,
    /// Withdrawal fee charged on the ledger side
    #[serde(default)]
    pub withdrawal_fee_sat: u64,
}

impl WithdrawalDetails {
    pub fn new(
        source_account: impl Into<String>,
        destination_address: impl Into<String>,
        amount_sat: u64,
        request_timestamp: u64,
        withdrawal_index: u32,
    ) -> Self {
        Self {
            source_account: source_account.into(),
            destination_address: destination_address.into(),
            amount_sat,
            request_timestamp,
            withdrawal_index,
            withdrawal_fee_sat: 0,
        }
    }

    pub fn with_fee(mut self, fee_sat: u64) -> Self {
        self.withdrawal_fee_sat = fee_sat;
        self
    }

    /// Derive the withdrawal id. The ledger-side fee is not part of it.
    pub fn withdrawal_id(&self) -> WithdrawalId {
        let preimage = format!(
            "{}|{}|{}|{}|{}",
            self.source_account,
            self.destination_address,
            self.amount_sat,
            self.request_timestamp,
            self.withdrawal_index
        );
        let digest = Sha256::digest(preimage.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(WITHDRAWAL_ID_LEN);
        WithdrawalId(id)
    }
}

impl fmt::Display for WithdrawalDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "withdrawal {} of {} sat from {} to {}",
            self.withdrawal_id(),
            self.amount_sat,
            self.source_account,
            self.destination_address
        )
    }
}
