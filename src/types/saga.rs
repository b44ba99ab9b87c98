//! Saga State Types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a withdrawal in the saga, reconstructed from ledger facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    /// Nothing but (at most) the transfer is on the ledger
    Requested,
    /// At least one consensus proposal exists
    ConsensusProposed,
    /// Quorum reached and materialisation has run
    ConsensusEstablished,
    /// Transaction record stored
    TransactionCreated,
    /// At least one signature contribution exists
    Signing,
    /// Relayed to the Bitcoin network (terminal)
    Broadcast,
    /// Compensated (terminal)
    RolledBack,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Broadcast | SagaState::RolledBack)
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::ConsensusProposed => write!(f, "consensus_proposed"),
            Self::ConsensusEstablished => write!(f, "consensus_established"),
            Self::TransactionCreated => write!(f, "transaction_created"),
            Self::Signing => write!(f, "signing"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Idempotency fence for a write-once stage. `Done` and `RolledBack` never
/// revert, and a withdrawal holding either one is not acted on again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceState {
    NotStarted,
    InProgress,
    Done,
    RolledBack,
}

impl FenceState {
    pub fn is_done(&self) -> bool {
        matches!(self, FenceState::Done)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FenceState::Done | FenceState::RolledBack)
    }
}
