//! UTXO Provider
//!
//! Coin selection over the bridge wallet plus the node-local reservation
//! table that keeps two concurrent withdrawals off the same outputs.
//!
//! Selection and reservation happen under one mutex so a release (rollback)
//! can never interleave with a selection touching the same outputs.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::fee::{selection_fee, SharedFeeRate};
use crate::bitcoin::UnspentSource;
use crate::common::Result;
use crate::types::{total_value, UnspentOutput, UtxoRef, WithdrawalDetails, WithdrawalId};

/// Coin selection errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UtxoError {
    #[error("insufficient funds: need {required} sats, have {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("no fee margin: {total} sats cannot pay {amount} sats plus fees")]
    NoFeeMargin { amount: u64, total: u64 },

    #[error("no eligible UTXO: wallet outputs lack confirmations or exceed the height limit")]
    NoEligibleUtxo,

    #[error("no fee data")]
    NoFeeRate,

    #[error("wallet error: {0}")]
    Wallet(String),
}

/// Greedy descending coin selection
///
/// Filters `wallet` to outputs that are not excluded, have at least
/// `min_confirmations` and were confirmed at or below `max_block_height`,
/// then takes the most valuable outputs (ties by outpoint) until they cover
/// `amount_sat` plus the fee for that many inputs.
pub fn collect_unspents(
    wallet: &[UnspentOutput],
    excluded: &HashSet<UtxoRef>,
    amount_sat: u64,
    max_block_height: i64,
    min_confirmations: u32,
    fee_rate: u64,
) -> std::result::Result<Vec<UnspentOutput>, UtxoError> {
    let candidates: Vec<&UnspentOutput> = wallet
        .iter()
        .filter(|u| !excluded.contains(&u.outpoint()))
        .collect();

    // Every requirement below is bounded by this one
    if amount_sat
        .checked_add(selection_fee(wallet.len().max(1), fee_rate))
        .is_none()
    {
        return Err(UtxoError::InsufficientFunds {
            required: u64::MAX,
            available: total_value(candidates.iter().copied()),
        });
    }

    let mut eligible: Vec<&UnspentOutput> = candidates
        .iter()
        .copied()
        .filter(|u| u.confirmations >= min_confirmations)
        .filter(|u| matches!(u.block_height, Some(h) if (h as i64) <= max_block_height))
        .collect();

    if eligible.is_empty() {
        if candidates.is_empty() {
            return Err(UtxoError::InsufficientFunds {
                required: amount_sat + selection_fee(1, fee_rate),
                available: 0,
            });
        }
        return Err(UtxoError::NoEligibleUtxo);
    }

    eligible.sort_by(|a, b| {
        b.value_sat
            .cmp(&a.value_sat)
            .then_with(|| a.outpoint().cmp(&b.outpoint()))
    });

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in &eligible {
        selected.push((*utxo).clone());
        total = total.saturating_add(utxo.value_sat);
        if total >= amount_sat + selection_fee(selected.len(), fee_rate) {
            return Ok(selected);
        }
    }

    // Exhausted: tell apart "no room for fees", "money not confirmed yet"
    // and "no money"
    if total >= amount_sat {
        return Err(UtxoError::NoFeeMargin {
            amount: amount_sat,
            total,
        });
    }

    let candidate_total = total_value(candidates.iter().copied());
    if candidate_total >= amount_sat + selection_fee(candidates.len(), fee_rate) {
        return Err(UtxoError::NoEligibleUtxo);
    }

    Err(UtxoError::InsufficientFunds {
        required: amount_sat + selection_fee(selected.len(), fee_rate),
        available: total,
    })
}

/// Outputs chosen for a withdrawal and the chain height they were chosen at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub utxos: Vec<UnspentOutput>,
    pub available_height: u64,
}

/// Coin selection with reservations, as used by the saga
#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// Select outputs for `details` and reserve them, atomically
    async fn select_and_reserve(
        &self,
        details: &WithdrawalDetails,
        min_confirmations: u32,
    ) -> Result<Selection>;

    /// Point the reservation of a withdrawal at exactly `outputs`
    async fn register_unspents(&self, withdrawal_id: &WithdrawalId, outputs: &[UnspentOutput]) -> Result<()>;

    /// Release those of `outputs` reserved for the withdrawal; returns how many
    async fn unregister_unspents(&self, withdrawal_id: &WithdrawalId, outputs: &[UtxoRef]) -> Result<usize>;

    /// Outputs currently reserved for a withdrawal
    async fn reserved_for(&self, withdrawal_id: &WithdrawalId) -> Result<Vec<UtxoRef>>;
}

/// Single-writer reservation table: outpoint -> owning withdrawal
#[derive(Debug, Default)]
pub struct ReservationTable {
    entries: HashMap<UtxoRef, WithdrawalId>,
}

impl ReservationTable {
    /// Outputs reserved by any withdrawal other than `id`
    pub fn held_by_others(&self, id: &WithdrawalId) -> HashSet<UtxoRef> {
        self.entries
            .iter()
            .filter(|(_, owner)| *owner != id)
            .map(|(utxo, _)| utxo.clone())
            .collect()
    }

    pub fn owned_by(&self, id: &WithdrawalId) -> Vec<UtxoRef> {
        let mut owned: Vec<UtxoRef> = self
            .entries
            .iter()
            .filter(|(_, owner)| *owner == id)
            .map(|(utxo, _)| utxo.clone())
            .collect();
        owned.sort();
        owned
    }

    /// Replace the reservation of `id`; returns outputs taken from others
    pub fn reserve(&mut self, id: &WithdrawalId, outputs: impl IntoIterator<Item = UtxoRef>) -> Vec<(UtxoRef, WithdrawalId)> {
        self.entries.retain(|_, owner| owner != id);
        let mut displaced = Vec::new();
        for utxo in outputs {
            if let Some(previous) = self.entries.insert(utxo.clone(), id.clone()) {
                displaced.push((utxo, previous));
            }
        }
        displaced
    }

    /// Release the given outputs if `id` holds them
    pub fn release(&mut self, id: &WithdrawalId, outputs: &[UtxoRef]) -> usize {
        let mut released = 0;
        for utxo in outputs {
            if self.entries.get(utxo) == Some(id) {
                self.entries.remove(utxo);
                released += 1;
            }
        }
        released
    }

    /// Drop reservations for outputs no longer unspent
    pub fn prune_spent(&mut self, unspent: &HashSet<UtxoRef>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|utxo, _| unspent.contains(utxo));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// UTXO provider backed by a wallet source
pub struct WalletUtxoProvider {
    wallet: Arc<dyn UnspentSource>,
    fee_rate: SharedFeeRate,
    reservations: Mutex<ReservationTable>,
}

impl WalletUtxoProvider {
    pub fn new(wallet: Arc<dyn UnspentSource>, fee_rate: SharedFeeRate) -> Self {
        Self {
            wallet,
            fee_rate,
            reservations: Mutex::new(ReservationTable::default()),
        }
    }

    /// Selection without side effects
    ///
    /// Outputs reserved for other withdrawals are excluded on top of
    /// `excluded`; outputs already reserved for `details` stay selectable.
    pub async fn collect_unspents(
        &self,
        details: &WithdrawalDetails,
        excluded: &HashSet<UtxoRef>,
        amount_sat: u64,
        max_block_height: i64,
        min_confirmations: u32,
    ) -> Result<Vec<UnspentOutput>> {
        let fee_rate = self.fee_rate.current().ok_or(UtxoError::NoFeeRate)?;
        let wallet = self.wallet.list_unspents().await?;

        let reservations = self.reservations.lock().await;
        let mut excluded = excluded.clone();
        excluded.extend(reservations.held_by_others(&details.withdrawal_id()));
        drop(reservations);

        Ok(collect_unspents(
            &wallet,
            &excluded,
            amount_sat,
            max_block_height,
            min_confirmations,
            fee_rate,
        )?)
    }

    /// Sum of output values
    pub fn get_total_unspent_value(outputs: &[UnspentOutput]) -> u64 {
        total_value(outputs)
    }

    /// Number of reserved outputs across all withdrawals
    pub async fn reserved_count(&self) -> usize {
        self.reservations.lock().await.len()
    }
}

#[async_trait]
impl UtxoProvider for WalletUtxoProvider {
    async fn select_and_reserve(
        &self,
        details: &WithdrawalDetails,
        min_confirmations: u32,
    ) -> Result<Selection> {
        let fee_rate = self.fee_rate.current().ok_or(UtxoError::NoFeeRate)?;
        let id = details.withdrawal_id();

        let mut reservations = self.reservations.lock().await;

        let wallet = self.wallet.list_unspents().await?;
        let available_height = self.wallet.chain_height().await?;

        let unspent: HashSet<UtxoRef> = wallet.iter().map(UnspentOutput::outpoint).collect();
        let pruned = reservations.prune_spent(&unspent);
        if pruned > 0 {
            debug!(pruned, "Dropped reservations of spent outputs");
        }

        let excluded = reservations.held_by_others(&id);
        let utxos = collect_unspents(
            &wallet,
            &excluded,
            details.amount_sat,
            available_height as i64,
            min_confirmations,
            fee_rate,
        )?;

        reservations.reserve(&id, utxos.iter().map(UnspentOutput::outpoint));
        info!(
            withdrawal_id = %id,
            inputs = utxos.len(),
            total = total_value(&utxos),
            "Reserved UTXOs"
        );

        Ok(Selection {
            utxos,
            available_height,
        })
    }

    async fn register_unspents(&self, withdrawal_id: &WithdrawalId, outputs: &[UnspentOutput]) -> Result<()> {
        let id = withdrawal_id;
        let mut reservations = self.reservations.lock().await;
        for (utxo, previous) in reservations.reserve(id, outputs.iter().map(UnspentOutput::outpoint)) {
            warn!(
                withdrawal_id = %id,
                utxo = %utxo,
                previous = %previous,
                "Agreed UTXO was reserved locally for another withdrawal"
            );
        }
        Ok(())
    }

    async fn unregister_unspents(&self, withdrawal_id: &WithdrawalId, outputs: &[UtxoRef]) -> Result<usize> {
        let id = withdrawal_id;
        let released = self.reservations.lock().await.release(id, outputs);
        info!(withdrawal_id = %id, released, "Released UTXO reservations");
        Ok(released)
    }

    async fn reserved_for(&self, withdrawal_id: &WithdrawalId) -> Result<Vec<UtxoRef>> {
        Ok(self.reservations.lock().await.owned_by(withdrawal_id))
    }
}
