//! In-Memory Fact Store
//!
//! Provides in-memory storage for testing and development.
//! Data is lost when the process exits.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{FactStore, StorageError, StorageResult};
use crate::types::{Fact, Namespace, WithdrawalId};

#[derive(Default)]
struct Inner {
    /// Facts indexed by sequence number
    facts: BTreeMap<u64, Fact>,
    next_seq: u64,
}

/// In-memory ledger fact store
///
/// Thread-safe; clones share the same facts.
#[derive(Clone, Default)]
pub struct MemoryFactStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryFactStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored facts
    pub async fn len(&self) -> usize {
        self.inner.read().await.facts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn append(inner: &mut Inner, fact: &Fact) -> u64 {
    inner.next_seq += 1;
    let seq = inner.next_seq;
    let mut stored = fact.clone();
    stored.seq = seq;
    inner.facts.insert(seq, stored);
    seq
}

fn duplicate(fact: &Fact) -> StorageError {
    StorageError::Duplicate(format!("{}/{}", fact.namespace, fact.key))
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn insert(&self, fact: &Fact) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;

        let exists = inner.facts.values().any(|f| {
            f.namespace == fact.namespace && f.key == fact.key && f.author == fact.author
        });
        if exists {
            return Err(duplicate(fact));
        }

        Ok(append(&mut inner, fact))
    }

    async fn insert_once(&self, fact: &Fact) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;

        let exists = inner
            .facts
            .values()
            .any(|f| f.namespace == fact.namespace && f.key == fact.key);
        if exists {
            return Err(duplicate(fact));
        }

        Ok(append(&mut inner, fact))
    }

    async fn get(&self, namespace: Namespace, key: &WithdrawalId) -> StorageResult<Vec<Fact>> {
        let inner = self.inner.read().await;
        Ok(inner
            .facts
            .values()
            .filter(|f| f.namespace == namespace && &f.key == key)
            .cloned()
            .collect())
    }

    async fn facts_after(&self, seq: u64, limit: usize) -> StorageResult<Vec<Fact>> {
        let inner = self.inner.read().await;
        Ok(inner
            .facts
            .range(seq + 1..)
            .take(limit)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn last_seq(&self) -> StorageResult<u64> {
        Ok(self.inner.read().await.next_seq)
    }
}
