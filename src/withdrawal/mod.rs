//! Withdrawal Saga Components
//!
//! The collaborators driven by the event handlers, each behind a trait so
//! handlers can be exercised with in-memory fakes.
//!
//! # Flow
//!
//! ```text
//! transfer ──► UtxoProvider (select + reserve)
//!          ──► ConsensusProvider (post proposal)
//! quorum   ──► TransactionCreator ──► TransactionStorage (write once)
//! record   ──► SignCollector (sign, append contribution)
//! m sigs   ──► merge ──► BtcNetwork ──► BroadcastsProvider (write once)
//! failure  ──► RollbackService (release reservations, post record)
//! ```

pub mod broadcasts;
pub mod builder;
pub mod consensus;
pub mod fee;
pub mod finalize;
pub mod rollback;
pub mod sign_collector;
pub mod signer;
pub mod stats;
pub mod tracker;
pub mod tx_storage;
pub mod utxo;

// Re-exports
pub use broadcasts::{BroadcastsProvider, LedgerBroadcasts};
pub use builder::{BuilderError, TransactionCreator};
pub use consensus::{ConsensusProvider, LedgerConsensusProvider, WithdrawOutcome};
pub use fee::{
    dust_threshold, is_dust, selection_fee, tx_fee, CurrentFeeRate, FeeRateProvider, SharedFeeRate,
    StaticFeeRate,
};
pub use finalize::FinalizationService;
pub use rollback::{release_reservations, BtcRollbackService, RollbackService};
pub use sign_collector::{LedgerSignCollector, SignCollector};
pub use signer::{MultisigSigner, MultisigWallet, SignerError};
pub use stats::{StatsSnapshot, WithdrawalStats};
pub use tracker::{WithdrawalReport, WithdrawalTracker};
pub use tx_storage::{LedgerTransactionStorage, TransactionStorage};
pub use utxo::{collect_unspents, Selection, UtxoError, UtxoProvider, WalletUtxoProvider};
