//! BTC Withdrawal Node
//!
//! One validator of a federated Bitcoin bridge. Withdrawals are driven as a
//! saga over shared ledger facts:
//!
//! 1. **Transfer** - a user transfers wrapped BTC to the bridge account
//! 2. **Consensus** - every validator selects and reserves UTXOs and posts a proposal
//! 3. **Transaction** - once a quorum proposes the same set, the unsigned
//!    transaction is materialized exactly once
//! 4. **Signing** - every validator signs with its multisig share
//! 5. **Broadcast** - the first node holding enough signatures relays the
//!    transaction and records the broadcast fence
//! 6. **Finalization** - the ledger side is settled
//!
//! Any failure before the broadcast fence rolls the withdrawal back and
//! frees its reservations.

pub mod bitcoin;
pub mod common;
pub mod handler;
pub mod ledger;
pub mod node;
pub mod storage;
pub mod types;
pub mod withdrawal;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports: infrastructure
pub use common::{BridgeConfig, BridgeError, ErrorKind, Result};
pub use ledger::{Ledger, SequencedEvent};
pub use node::BridgeNode;
pub use storage::{FactStore, MemoryFactStore, SqliteFactStore};

// Re-exports: saga types
pub use types::{
    LedgerEvent, Namespace, SagaState, TransactionRecord, TransferCommand, UnspentOutput, UtxoRef,
    WithdrawalDetails, WithdrawalId,
};

// Re-exports: withdrawal services
pub use withdrawal::{
    MultisigSigner, MultisigWallet, StatsSnapshot, WithdrawalReport, WithdrawalStats,
    WithdrawalTracker,
};
