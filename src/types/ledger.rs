//! Ledger Fact and Event Types
//!
//! The replicated ledger is modelled as an append-only store of facts. Each
//! fact lives in a namespace, is keyed by a withdrawal id and carries the
//! identity of the validator that wrote it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::utxo::UtxoRef;
use super::withdrawal::{WithdrawalDetails, WithdrawalId};

/// Fact namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Inbound transfer commands
    Transfers,
    /// One consensus proposal per validator
    Consensus,
    /// Materialised transaction records (write-once)
    Transactions,
    /// Marker set once a transaction has been materialised (write-once)
    Established,
    /// One signature contribution per validator
    SignatureCollection,
    /// Broadcast fact (write-once)
    Broadcasts,
    /// Compensation records
    Rollbacks,
    /// Ledger-side settlement after broadcast (write-once)
    Finalizations,
}

impl Namespace {
    pub const ALL: [Namespace; 8] = [
        Namespace::Transfers,
        Namespace::Consensus,
        Namespace::Transactions,
        Namespace::Established,
        Namespace::SignatureCollection,
        Namespace::Broadcasts,
        Namespace::Rollbacks,
        Namespace::Finalizations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Transfers => "transfers",
            Namespace::Consensus => "consensus",
            Namespace::Transactions => "transactions",
            Namespace::Established => "established",
            Namespace::SignatureCollection => "signature-collection",
            Namespace::Broadcasts => "broadcasts",
            Namespace::Rollbacks => "rollbacks",
            Namespace::Finalizations => "finalizations",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .iter()
            .find(|ns| ns.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown namespace: {}", s))
    }
}

/// A single ledger fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    /// Store-assigned sequence number (0 before insertion)
    pub seq: u64,
    pub namespace: Namespace,
    pub key: WithdrawalId,
    /// Validator identity of the writer
    pub author: String,
    /// JSON payload
    pub value: String,
    /// Unix seconds
    pub created_at: i64,
}

impl Fact {
    pub fn new(
        namespace: Namespace,
        key: WithdrawalId,
        author: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            namespace,
            key,
            author: author.into(),
            value: value.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Event delivered to every node when a fact lands on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Transfer(TransferCommand),
    ConsensusProposed { withdrawal_id: WithdrawalId, author: String },
    TransactionCreated { withdrawal_id: WithdrawalId },
    SignatureAdded { withdrawal_id: WithdrawalId, author: String },
    BroadcastRecorded { withdrawal_id: WithdrawalId },
    RollbackRecorded { withdrawal_id: WithdrawalId, author: String },
    Finalized { withdrawal_id: WithdrawalId },
}

impl LedgerEvent {
    /// Translate a stored fact into the event it announces
    ///
    /// The established marker is bookkeeping only and announces nothing.
    pub fn from_fact(fact: &Fact) -> serde_json::Result<Option<Self>> {
        let withdrawal_id = fact.key.clone();
        let author = fact.author.clone();
        let event = match fact.namespace {
            Namespace::Transfers => LedgerEvent::Transfer(serde_json::from_str(&fact.value)?),
            Namespace::Consensus => LedgerEvent::ConsensusProposed { withdrawal_id, author },
            Namespace::Transactions => LedgerEvent::TransactionCreated { withdrawal_id },
            Namespace::Established => return Ok(None),
            Namespace::SignatureCollection => LedgerEvent::SignatureAdded { withdrawal_id, author },
            Namespace::Broadcasts => LedgerEvent::BroadcastRecorded { withdrawal_id },
            Namespace::Rollbacks => LedgerEvent::RollbackRecorded { withdrawal_id, author },
            Namespace::Finalizations => LedgerEvent::Finalized { withdrawal_id },
        };
        Ok(Some(event))
    }

    /// Withdrawal this event belongs to, used to serialise handling
    pub fn withdrawal_id(&self) -> WithdrawalId {
        match self {
            LedgerEvent::Transfer(cmd) => cmd.to_details().withdrawal_id(),
            LedgerEvent::ConsensusProposed { withdrawal_id, .. }
            | LedgerEvent::TransactionCreated { withdrawal_id }
            | LedgerEvent::SignatureAdded { withdrawal_id, .. }
            | LedgerEvent::BroadcastRecorded { withdrawal_id }
            | LedgerEvent::RollbackRecorded { withdrawal_id, .. }
            | LedgerEvent::Finalized { withdrawal_id } => withdrawal_id.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::Transfer(_) => "transfer",
            LedgerEvent::ConsensusProposed { .. } => "consensus_proposed",
            LedgerEvent::TransactionCreated { .. } => "transaction_created",
            LedgerEvent::SignatureAdded { .. } => "signature_added",
            LedgerEvent::BroadcastRecorded { .. } => "broadcast_recorded",
            LedgerEvent::RollbackRecorded { .. } => "rollback_recorded",
            LedgerEvent::Finalized { .. } => "finalized",
        }
    }
}

/// Inbound transfer command as observed on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommand {
    pub source_account: String,
    pub destination_account: String,
    /// Smallest-unit integer amount, as a string
    pub amount: String,
    /// Destination Bitcoin address
    pub description: String,
    /// Withdrawal fee in smallest units
    #[serde(default)]
    pub fee: Option<String>,
    /// Ledger transaction time (ms)
    pub created_time: u64,
    /// Index of the command inside its ledger transaction
    #[serde(default)]
    pub command_index: u32,
}

impl TransferCommand {
    /// Parsed amount; `None` unless the string is a plain integer
    pub fn amount_sat(&self) -> Option<u64> {
        super::units::parse_sat_amount(&self.amount)
    }

    pub fn fee_sat(&self) -> Option<u64> {
        match &self.fee {
            Some(fee) => super::units::parse_sat_amount(fee),
            None => Some(0),
        }
    }

    /// Withdrawal details; an unparsable amount yields zero
    pub fn to_details(&self) -> WithdrawalDetails {
        WithdrawalDetails::new(
            self.source_account.clone(),
            self.description.trim(),
            self.amount_sat().unwrap_or(0),
            self.created_time,
            self.command_index,
        )
        .with_fee(self.fee_sat().unwrap_or(0))
    }
}

/// Payload of the broadcast fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub withdrawal_id: WithdrawalId,
    pub details: WithdrawalDetails,
    pub btc_txid: String,
}

/// Compensation record posted on rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub withdrawal_id: WithdrawalId,
    pub reason: String,
    pub details: Option<WithdrawalDetails>,
    /// Outputs that were reserved for the withdrawal on the posting node
    pub utxos: Vec<UtxoRef>,
    pub created_at: i64,
}

/// Ledger-side settlement posted once the Bitcoin transaction is out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationRecord {
    pub withdrawal_id: WithdrawalId,
    pub source_account: String,
    /// Amount burned on the ledger
    pub amount_sat: u64,
    /// Fee paid to the billing account
    pub fee_sat: u64,
    pub btc_txid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> TransferCommand {
        TransferCommand {
            source_account: "alice@d3".to_string(),
            destination_account: "btc_withdrawal_service@notary".to_string(),
            amount: "15000".to_string(),
            description: "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx".to_string(),
            fee: Some("100".to_string()),
            created_time: 1_700_000_000_000,
            command_index: 0,
        }
    }

    #[test]
    fn test_namespace_round_trip() {
        for ns in Namespace::ALL {
            assert_eq!(ns.as_str().parse::<Namespace>().unwrap(), ns);
        }
        assert!("nope".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_transfer_details() {
        let details = transfer().to_details();
        assert_eq!(details.amount_sat, 15_000);
        assert_eq!(details.withdrawal_fee_sat, 100);
        assert_eq!(details.source_account, "alice@d3");
    }

    #[test]
    fn test_fact_to_event() {
        let cmd = transfer();
        let id = cmd.to_details().withdrawal_id();
        let fact = Fact::new(
            Namespace::Transfers,
            id.clone(),
            "alice@d3",
            serde_json::to_string(&cmd).unwrap(),
        );
        let event = LedgerEvent::from_fact(&fact).unwrap().unwrap();
        assert_eq!(event.withdrawal_id(), id);
        assert_eq!(event.kind(), "transfer");

        let fact = Fact::new(Namespace::SignatureCollection, id.clone(), "node-1", "{}");
        assert!(matches!(
            LedgerEvent::from_fact(&fact).unwrap(),
            Some(LedgerEvent::SignatureAdded { author, .. }) if author == "node-1"
        ));

        let fact = Fact::new(Namespace::Established, id, "node-1", "{}");
        assert_eq!(LedgerEvent::from_fact(&fact).unwrap(), None);
    }
}
