//! Consensus Proposal Types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::utxo::{UnspentOutput, UtxoRef};
use super::withdrawal::{WithdrawalDetails, WithdrawalId};

/// One validator's proposal of the UTXO set funding a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalConsensus {
    pub withdrawal_id: WithdrawalId,
    pub details: WithdrawalDetails,
    /// Outputs selected by the proposer
    pub selected_utxos: Vec<UnspentOutput>,
    /// Chain height the proposer selected against
    pub available_height: u64,
}

impl WithdrawalConsensus {
    pub fn new(details: WithdrawalDetails, selected_utxos: Vec<UnspentOutput>, available_height: u64) -> Self {
        Self {
            withdrawal_id: details.withdrawal_id(),
            details,
            selected_utxos,
            available_height,
        }
    }

    /// Selected outpoints
    pub fn utxo_set(&self) -> BTreeSet<UtxoRef> {
        self.selected_utxos.iter().map(UnspentOutput::outpoint).collect()
    }

    /// Both the id field and the hash of the details name `withdrawal_id`
    pub fn is_for(&self, withdrawal_id: &WithdrawalId) -> bool {
        self.withdrawal_id == *withdrawal_id && self.details.withdrawal_id() == *withdrawal_id
    }

    /// Same withdrawal details and the same outpoint set
    pub fn agrees_with(&self, other: &WithdrawalConsensus) -> bool {
        self.details == other.details && self.utxo_set() == other.utxo_set()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Outcome of looking for agreement among proposals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuorumOutcome {
    /// `quorum` or more proposals carry the same set
    Reached(WithdrawalConsensus),
    /// Not enough equal proposals yet
    Pending { proposals: usize, largest_group: usize },
    /// Every validator proposed and no group can reach quorum anymore
    Diverged { proposals: usize, largest_group: usize },
}

/// Find the common consensus among proposals
///
/// Equality is strict on the selected outpoint set and on the withdrawal
/// details, so a proposal can only decide where funds go with a quorum
/// behind it. When more than one group reaches quorum (only possible with a
/// quorum below a majority) the group with the smallest set wins so every
/// node picks the same one.
pub fn common_consensus(
    proposals: &[WithdrawalConsensus],
    quorum: usize,
    validators: usize,
) -> QuorumOutcome {
    let mut groups: Vec<(BTreeSet<UtxoRef>, Vec<&WithdrawalConsensus>)> = Vec::new();
    for proposal in proposals {
        match groups.iter_mut().find(|(_, members)| members[0].agrees_with(proposal)) {
            Some((_, members)) => members.push(proposal),
            None => groups.push((proposal.utxo_set(), vec![proposal])),
        }
    }

    let largest_group = groups.iter().map(|(_, m)| m.len()).max().unwrap_or(0);

    let winner = groups
        .iter()
        .filter(|(_, members)| members.len() >= quorum)
        .min_by(|(a, _), (b, _)| a.cmp(b));

    if let Some((_, members)) = winner {
        return QuorumOutcome::Reached(members[0].clone());
    }

    let outstanding = validators.saturating_sub(proposals.len());
    if proposals.len() >= validators || largest_group + outstanding < quorum {
        QuorumOutcome::Diverged {
            proposals: proposals.len(),
            largest_group,
        }
    } else {
        QuorumOutcome::Pending {
            proposals: proposals.len(),
            largest_group,
        }
    }
}
