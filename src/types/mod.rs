//! Shared Types Module
//!
//! Data types shared across the withdrawal saga.

pub mod consensus;
pub mod ledger;
pub mod saga;
pub mod signature;
pub mod transaction;
pub mod units;
pub mod utxo;
pub mod withdrawal;

// Re-exports for convenience
pub use consensus::{common_consensus, QuorumOutcome, WithdrawalConsensus};
pub use ledger::{
    BroadcastRecord, Fact, FinalizationRecord, LedgerEvent, Namespace, RollbackRecord,
    TransferCommand,
};
pub use saga::{FenceState, SagaState};
pub use signature::{InputSignature, SignatureContribution};
pub use transaction::{TransactionRecord, TxDecodeError};
pub use units::{parse_sat_amount, sats_to_btc_string, sats_to_display, SATS_PER_BTC};
pub use utxo::{total_value, UnspentOutput, UtxoRef};
pub use withdrawal::{WithdrawalDetails, WithdrawalId};
