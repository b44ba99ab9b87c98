//! Transaction Storage
//!
//! Durable withdrawal id -> transaction record mapping. A record is written
//! once; the first materialization wins and every later one is a no-op.

use async_trait::async_trait;

use crate::common::Result;
use crate::ledger::{is_duplicate, Ledger};
use crate::types::{Namespace, TransactionRecord, WithdrawalId};

#[async_trait]
pub trait TransactionStorage: Send + Sync {
    /// Store a record; `false` if one already exists for the withdrawal
    async fn save(&self, record: &TransactionRecord) -> Result<bool>;

    async fn get(&self, withdrawal_id: &WithdrawalId) -> Result<Option<TransactionRecord>>;
}

/// Transaction records kept as write-once ledger facts
#[derive(Clone)]
pub struct LedgerTransactionStorage {
    ledger: Ledger,
    node_id: String,
}

impl LedgerTransactionStorage {
    pub fn new(ledger: Ledger, node_id: impl Into<String>) -> Self {
        Self {
            ledger,
            node_id: node_id.into(),
        }
    }
}

#[async_trait]
impl TransactionStorage for LedgerTransactionStorage {
    async fn save(&self, record: &TransactionRecord) -> Result<bool> {
        match self
            .ledger
            .put_once(Namespace::Transactions, &record.withdrawal_id, &self.node_id, record)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, withdrawal_id: &WithdrawalId) -> Result<Option<TransactionRecord>> {
        self.ledger.read_one(Namespace::Transactions, withdrawal_id).await
    }
}
