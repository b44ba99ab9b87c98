//! Withdrawal Statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one node
#[derive(Debug, Default)]
pub struct WithdrawalStats {
    started: AtomicU64,
    rolled_back: AtomicU64,
    transactions_created: AtomicU64,
    signatures_posted: AtomicU64,
    broadcast: AtomicU64,
    finalized: AtomicU64,
    total_sats_withdrawn: AtomicU64,
}

impl WithdrawalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_created(&self) {
        self.transactions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signature_posted(&self) {
        self.signatures_posted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, amount_sat: u64) {
        self.broadcast.fetch_add(1, Ordering::Relaxed);
        self.total_sats_withdrawn.fetch_add(amount_sat, Ordering::Relaxed);
    }

    pub fn record_finalized(&self) {
        self.finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            transactions_created: self.transactions_created.load(Ordering::Relaxed),
            signatures_posted: self.signatures_posted.load(Ordering::Relaxed),
            broadcast: self.broadcast.load(Ordering::Relaxed),
            finalized: self.finalized.load(Ordering::Relaxed),
            total_sats_withdrawn: self.total_sats_withdrawn.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WithdrawalStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub started: u64,
    pub rolled_back: u64,
    pub transactions_created: u64,
    pub signatures_posted: u64,
    pub broadcast: u64,
    pub finalized: u64,
    pub total_sats_withdrawn: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Withdrawals: {} started | {} created | {} signed | {} broadcast | {} finalized | {} rolled back",
            self.started,
            self.transactions_created,
            self.signatures_posted,
            self.broadcast,
            self.finalized,
            self.rolled_back
        )
    }
}

impl std::fmt::Display for WithdrawalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}
