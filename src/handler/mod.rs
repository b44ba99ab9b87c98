//! Ledger Event Handlers
//!
//! One handler per saga transition. Handlers never return errors: a failing
//! collaborator call ends in a rollback, an idempotency signal ends in a
//! no-op.
//!
//! The [`EventRouter`] runs each event on its own task. Events for the same
//! withdrawal are serialised through a per-id lock; different withdrawals
//! proceed concurrently. When the router falls behind the event channel it
//! reads the skipped facts back from the ledger, so every fact is handled at
//! least once.

pub mod broadcast;
pub mod consensus;
pub mod rollback;
pub mod signature;
pub mod transfer;
pub mod tx_created;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, broadcast::Receiver, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, SequencedEvent};
use crate::types::{LedgerEvent, WithdrawalId};

// Re-exports
pub use self::broadcast::BroadcastRecordedHandler;
pub use self::consensus::NewConsensusDataHandler;
pub use self::rollback::RollbackHandler;
pub use self::signature::NewSignatureEventHandler;
pub use self::transfer::TransferHandler;
pub use self::tx_created::NewTransactionCreatedHandler;

/// Every handler of one node
pub struct Handlers {
    pub transfer: TransferHandler,
    pub consensus: NewConsensusDataHandler,
    pub tx_created: NewTransactionCreatedHandler,
    pub signature: NewSignatureEventHandler,
    pub rollback: RollbackHandler,
    pub broadcast: BroadcastRecordedHandler,
}

impl Handlers {
    pub async fn handle(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::Transfer(transfer) => self.transfer.handle(transfer).await,
            LedgerEvent::ConsensusProposed { withdrawal_id, .. } => self.consensus.handle(withdrawal_id).await,
            LedgerEvent::TransactionCreated { withdrawal_id } => self.tx_created.handle(withdrawal_id).await,
            LedgerEvent::SignatureAdded { withdrawal_id, .. } => self.signature.handle(withdrawal_id).await,
            LedgerEvent::RollbackRecorded { withdrawal_id, author } => {
                self.rollback.handle(withdrawal_id, author).await
            }
            LedgerEvent::BroadcastRecorded { withdrawal_id } => self.broadcast.handle(withdrawal_id).await,
            LedgerEvent::Finalized { withdrawal_id } => {
                debug!(withdrawal_id = %withdrawal_id, "Withdrawal settled on the ledger")
            }
        }
    }
}

type LockMap = HashMap<WithdrawalId, Arc<Mutex<()>>>;

/// Facts re-read below the highest handled sequence number after a lag.
/// In-process writers may publish a few facts out of sequence order.
const REPLAY_OVERLAP: u64 = 64;

/// Dispatches ledger events to handlers
#[derive(Clone)]
pub struct EventRouter {
    handlers: Arc<Handlers>,
    ledger: Ledger,
    locks: Arc<Mutex<LockMap>>,
}

impl EventRouter {
    pub fn new(handlers: Handlers, ledger: Ledger) -> Self {
        Self {
            handlers: Arc::new(handlers),
            ledger,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle one event on a spawned task
    pub fn dispatch(&self, event: LedgerEvent) -> JoinHandle<()> {
        let handlers = self.handlers.clone();
        let locks = self.locks.clone();

        tokio::spawn(async move {
            let id = event.withdrawal_id();
            let lock = locks.lock().await.entry(id.clone()).or_default().clone();

            {
                let _guard = lock.lock().await;
                debug!(withdrawal_id = %id, event = event.kind(), "Handling event");
                handlers.handle(&event).await;
            }

            // Drop the lock entry once nobody else waits on it
            let mut locks = locks.lock().await;
            if Arc::strong_count(&lock) == 2 {
                locks.remove(&id);
            }
        })
    }

    /// Dispatch events until the channel closes
    pub async fn run(self, mut events: Receiver<SequencedEvent>) {
        info!(target: "bridge::system", "Event router started");
        let mut handled: Option<u64> = None;
        loop {
            match events.recv().await {
                Ok(published) => {
                    handled = Some(handled.map_or(published.seq, |seq| seq.max(published.seq)));
                    self.dispatch(published.event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "bridge::system", skipped, "Event router lagged behind the ledger");
                    let from = handled.map_or(0, |seq| seq.saturating_sub(REPLAY_OVERLAP));
                    if let Some(seq) = self.replay(from).await {
                        handled = Some(handled.map_or(seq, |h| h.max(seq)));
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(target: "bridge::system", "Event router stopped");
    }

    /// Dispatch every fact after `from` again; returns the highest sequence
    /// number replayed. Handlers are idempotent, so overlap is harmless.
    async fn replay(&self, from: u64) -> Option<u64> {
        match self.ledger.events_after(from).await {
            Ok(missed) => {
                info!(target: "bridge::system", from, events = missed.len(), "Replaying ledger events");
                let last = missed.iter().map(|published| published.seq).max();
                for published in missed {
                    self.dispatch(published.event);
                }
                last
            }
            Err(e) => {
                error!(target: "bridge::system", from, error = %e, "Could not replay ledger after lag");
                None
            }
        }
    }

    /// Withdrawals with an event being handled or waiting
    pub async fn active(&self) -> usize {
        self.locks.lock().await.len()
    }
}
