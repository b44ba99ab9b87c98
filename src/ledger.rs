//! Ledger Handle
//!
//! Wraps the fact store with typed reads and writes and fans every new fact
//! out to subscribers as a [`LedgerEvent`].
//!
//! In-process ledgers publish right after a write returns, so a handler
//! reacting to an event always finds the fact that produced it. A tailing
//! ledger never publishes on write; it polls the store by sequence number
//! instead, which also picks up facts written by other validator processes.
//!
//! Every event carries the sequence number of its fact so a subscriber that
//! fell behind the channel can read what it missed back from the store.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::common::Result;
use crate::storage::{FactStore, StorageError};
use crate::types::{Fact, LedgerEvent, Namespace, WithdrawalId};

/// Capacity of the event channel
const EVENT_CHANNEL_SIZE: usize = 1024;

/// Facts fetched per poll
const TAIL_BATCH: usize = 256;

/// An event and the sequence number of the fact behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: LedgerEvent,
}

/// Shared ledger handle
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn FactStore>,
    events: broadcast::Sender<SequencedEvent>,
    publish_on_write: bool,
}

impl Ledger {
    /// In-process ledger that publishes on write
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            store,
            events,
            publish_on_write: true,
        }
    }

    /// Ledger fed by [`Ledger::tail`]
    pub fn tailing(store: Arc<dyn FactStore>) -> Self {
        Self {
            publish_on_write: false,
            ..Self::new(store)
        }
    }

    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequencedEvent> {
        self.events.subscribe()
    }

    /// Append a per-author fact
    pub async fn put<T: Serialize>(
        &self,
        namespace: Namespace,
        key: &WithdrawalId,
        author: &str,
        value: &T,
    ) -> Result<u64> {
        let mut fact = Fact::new(namespace, key.clone(), author, serde_json::to_string(value)?);
        fact.seq = self.store.insert(&fact).await?;
        self.after_write(&fact);
        Ok(fact.seq)
    }

    /// Append a write-once fact; `StorageError::Duplicate` if one exists
    pub async fn put_once<T: Serialize>(
        &self,
        namespace: Namespace,
        key: &WithdrawalId,
        author: &str,
        value: &T,
    ) -> Result<u64> {
        let mut fact = Fact::new(namespace, key.clone(), author, serde_json::to_string(value)?);
        fact.seq = self.store.insert_once(&fact).await?;
        self.after_write(&fact);
        Ok(fact.seq)
    }

    /// Every fact for a key decoded as `T`, with its author
    pub async fn read<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &WithdrawalId,
    ) -> Result<Vec<(String, T)>> {
        self.store
            .get(namespace, key)
            .await?
            .into_iter()
            .map(|fact| Ok((fact.author, serde_json::from_str(&fact.value)?)))
            .collect()
    }

    /// First fact for a key; the only one for write-once namespaces
    pub async fn read_one<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &WithdrawalId,
    ) -> Result<Option<T>> {
        Ok(self.read(namespace, key).await?.into_iter().next().map(|(_, v)| v))
    }

    pub async fn exists(&self, namespace: Namespace, key: &WithdrawalId) -> Result<bool> {
        Ok(self.store.exists(namespace, key).await?)
    }

    fn after_write(&self, fact: &Fact) {
        debug!(
            namespace = %fact.namespace,
            withdrawal_id = %fact.key,
            author = %fact.author,
            seq = fact.seq,
            "Fact written"
        );
        if self.publish_on_write {
            self.publish(fact);
        }
    }

    fn decode(fact: &Fact) -> Option<SequencedEvent> {
        match LedgerEvent::from_fact(fact) {
            Ok(event) => event.map(|event| SequencedEvent { seq: fact.seq, event }),
            Err(e) => {
                warn!(seq = fact.seq, namespace = %fact.namespace, error = %e, "Undecodable fact");
                None
            }
        }
    }

    fn publish(&self, fact: &Fact) {
        if let Some(event) = Self::decode(fact) {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    /// Events of every fact after `cursor`, read from the store without
    /// publishing them
    pub async fn events_after(&self, cursor: u64) -> Result<Vec<SequencedEvent>> {
        let mut cursor = cursor;
        let mut events = Vec::new();
        loop {
            let facts = self.store.facts_after(cursor, TAIL_BATCH).await?;
            let fetched = facts.len();
            for fact in &facts {
                events.extend(Self::decode(fact));
                cursor = cursor.max(fact.seq);
            }
            if fetched < TAIL_BATCH {
                return Ok(events);
            }
        }
    }

    /// Sequence number of the newest fact
    pub async fn head(&self) -> Result<u64> {
        Ok(self.store.last_seq().await?)
    }

    /// Publish every fact after `cursor`; returns the new cursor
    pub async fn poll(&self, cursor: u64) -> Result<u64> {
        let mut cursor = cursor;
        loop {
            let facts = self.store.facts_after(cursor, TAIL_BATCH).await?;
            let fetched = facts.len();
            for fact in &facts {
                self.publish(fact);
                cursor = cursor.max(fact.seq);
            }
            if fetched < TAIL_BATCH {
                return Ok(cursor);
            }
        }
    }

    /// Poll forever
    pub async fn tail(&self, from_seq: u64, interval: Duration) {
        let mut cursor = from_seq;
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.poll(cursor).await {
                Ok(next) => cursor = next,
                Err(e) => error!(error = %e, cursor, "Ledger poll failed"),
            }
        }
    }
}

/// Whether an error is the store refusing a second write
pub fn is_duplicate(err: &crate::common::BridgeError) -> bool {
    matches!(err, crate::common::BridgeError::Storage(StorageError::Duplicate(_)))
}
