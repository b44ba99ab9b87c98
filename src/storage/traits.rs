//! Storage Trait Definitions
//!
//! Defines the ledger fact store interface.
//! Implementations can use SQLite (production) or in-memory (testing).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Fact, Namespace, WithdrawalId};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Append-only ledger fact store
///
/// Facts are never updated or deleted. `(namespace, key, author)` is unique;
/// `insert_once` additionally refuses a second fact for `(namespace, key)`
/// whatever its author.
///
/// Implementations:
/// - `SqliteFactStore` - Production storage with SQLite
/// - `MemoryFactStore` - In-memory storage for testing
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Append a fact; `Duplicate` if the author already wrote this key
    async fn insert(&self, fact: &Fact) -> StorageResult<u64>;

    /// Append a write-once fact; `Duplicate` if any fact exists for the key
    async fn insert_once(&self, fact: &Fact) -> StorageResult<u64>;

    /// All facts for a key, in insertion order
    async fn get(&self, namespace: Namespace, key: &WithdrawalId) -> StorageResult<Vec<Fact>>;

    /// Whether any fact exists for a key
    async fn exists(&self, namespace: Namespace, key: &WithdrawalId) -> StorageResult<bool> {
        Ok(!self.get(namespace, key).await?.is_empty())
    }

    /// Facts with a sequence number above `seq`, oldest first
    async fn facts_after(&self, seq: u64, limit: usize) -> StorageResult<Vec<Fact>>;

    /// Highest sequence number written so far (0 when empty)
    async fn last_seq(&self) -> StorageResult<u64>;
}
