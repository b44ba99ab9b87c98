//! In-memory fakes and fixtures shared by unit tests
//!
//! Every fake has forced-failure switches and call counters so handlers can
//! be driven through each failure path deterministically.

use async_trait::async_trait;
use bitcoin::{secp256k1, Network, Transaction};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::bitcoin::{BtcNetwork, UnspentSource};
use crate::common::config::DEFAULT_BRIDGE_ACCOUNT;
use crate::common::{BridgeError, Result};
use crate::types::{
    FenceState, InputSignature, SignatureContribution, TransactionRecord, TransferCommand,
    UnspentOutput, UtxoRef, WithdrawalConsensus, WithdrawalDetails, WithdrawalId,
};
use crate::withdrawal::utxo::ReservationTable;
use crate::withdrawal::{
    BroadcastsProvider, ConsensusProvider, MultisigSigner, MultisigWallet, RollbackService, Selection,
    SignCollector, TransactionCreator, TransactionStorage, UtxoError, UtxoProvider, WithdrawOutcome,
};

pub const DEST_ADDRESS: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
pub const BRIDGE_ACCOUNT: &str = DEFAULT_BRIDGE_ACCOUNT;

/// Secret key `i` as big-endian bytes
pub fn secret(i: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[31] = i;
    bytes
}

pub fn secret_hex(i: u8) -> String {
    hex::encode(secret(i))
}

/// 2-of-3 wallet over secret keys 1, 2 and 3
pub fn test_wallet() -> MultisigWallet {
    let keys: Vec<secp256k1::PublicKey> = (1..=3)
        .filter_map(|i| MultisigSigner::from_bytes(&secret(i)).ok())
        .map(|s| s.public_key().inner)
        .collect();
    MultisigWallet::new(&keys, 2, Network::Testnet).unwrap()
}

/// 64-character txid made of one repeated byte
pub fn txid(n: u8) -> String {
    format!("{:02x}", n).repeat(32)
}

pub fn utxo(txid: &str, vout: u32, value_sat: u64, confirmations: u32) -> UnspentOutput {
    utxo_at(txid, vout, value_sat, confirmations, 100)
}

pub fn utxo_at(txid: &str, vout: u32, value_sat: u64, confirmations: u32, height: u64) -> UnspentOutput {
    UnspentOutput {
        txid: txid.to_string(),
        vout,
        value_sat,
        confirmations,
        block_height: Some(height),
    }
}

pub fn details(amount_sat: u64) -> WithdrawalDetails {
    WithdrawalDetails::new("alice@d3", DEST_ADDRESS, amount_sat, 1_700_000_000_000, 0)
}

pub fn transfer(amount_sat: u64) -> TransferCommand {
    TransferCommand {
        source_account: "alice@d3".to_string(),
        destination_account: BRIDGE_ACCOUNT.to_string(),
        amount: amount_sat.to_string(),
        description: DEST_ADDRESS.to_string(),
        fee: None,
        created_time: 1_700_000_000_000,
        command_index: 0,
    }
}

/// Unsigned transaction spending `inputs` (already in outpoint order)
pub fn unsigned_tx(inputs: &[UnspentOutput], wallet: &MultisigWallet) -> Transaction {
    TransactionCreator::new(wallet)
        .build(&details(10_000), inputs, 1)
        .unwrap()
        .transaction()
        .unwrap()
}

/// Record spending one 100,000 sat output
pub fn sample_record(amount_sat: u64) -> TransactionRecord {
    TransactionCreator::new(&test_wallet())
        .build(&details(amount_sat), &[utxo(&txid(1), 0, 100_000, 6)], 10)
        .unwrap()
}

fn failure(what: &str) -> BridgeError {
    BridgeError::transport(format!("{} unavailable", what))
}

// ============================================================================
// Bitcoin side
// ============================================================================

pub struct FakeWallet {
    unspents: RwLock<Vec<UnspentOutput>>,
    height: u64,
    pub fail: AtomicBool,
}

impl FakeWallet {
    pub fn new(unspents: Vec<UnspentOutput>, height: u64) -> Self {
        Self {
            unspents: RwLock::new(unspents),
            height,
            fail: AtomicBool::new(false),
        }
    }

    pub async fn set_unspents(&self, unspents: Vec<UnspentOutput>) {
        *self.unspents.write().await = unspents;
    }
}

#[async_trait]
impl UnspentSource for FakeWallet {
    async fn list_unspents(&self) -> Result<Vec<UnspentOutput>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(UtxoError::Wallet("wallet offline".to_string()).into());
        }
        Ok(self.unspents.read().await.clone())
    }

    async fn chain_height(&self) -> Result<u64> {
        Ok(self.height)
    }
}

/// Peer network accepting every transaction, repeated ones included
#[derive(Default)]
pub struct FakeNetwork {
    relayed: Mutex<Vec<Transaction>>,
    pub fail: AtomicBool,
}

impl FakeNetwork {
    pub fn broadcasts(&self) -> usize {
        self.relayed.lock().unwrap().len()
    }

    pub fn distinct_txids(&self) -> HashSet<String> {
        self.relayed
            .lock()
            .unwrap()
            .iter()
            .map(|tx| tx.compute_txid().to_string())
            .collect()
    }

    pub fn last(&self) -> Option<Transaction> {
        self.relayed.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl BtcNetwork for FakeNetwork {
    async fn broadcast(&self, tx: &Transaction) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(failure("peer network"));
        }
        self.relayed.lock().unwrap().push(tx.clone());
        Ok(tx.compute_txid().to_string())
    }
}

// ============================================================================
// Saga collaborators
// ============================================================================

/// UTXO provider handing out a fixed selection
#[derive(Default)]
pub struct FakeUtxoProvider {
    selection: Vec<UnspentOutput>,
    reservations: Mutex<ReservationTable>,
    registered: AtomicUsize,
    released: AtomicUsize,
    pub fail_selection: AtomicBool,
    pub fail_release: AtomicBool,
}

impl FakeUtxoProvider {
    pub fn with_selection(selection: Vec<UnspentOutput>) -> Self {
        Self {
            selection,
            ..Self::default()
        }
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UtxoProvider for FakeUtxoProvider {
    async fn select_and_reserve(&self, details: &WithdrawalDetails, _min_confirmations: u32) -> Result<Selection> {
        if self.fail_selection.load(Ordering::SeqCst) {
            return Err(UtxoError::InsufficientFunds {
                required: details.amount_sat,
                available: 0,
            }
            .into());
        }
        self.reservations
            .lock()
            .unwrap()
            .reserve(&details.withdrawal_id(), self.selection.iter().map(UnspentOutput::outpoint));
        Ok(Selection {
            utxos: self.selection.clone(),
            available_height: 100,
        })
    }

    async fn register_unspents(&self, withdrawal_id: &WithdrawalId, outputs: &[UnspentOutput]) -> Result<()> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        self.reservations
            .lock()
            .unwrap()
            .reserve(withdrawal_id, outputs.iter().map(UnspentOutput::outpoint));
        Ok(())
    }

    async fn unregister_unspents(&self, withdrawal_id: &WithdrawalId, outputs: &[UtxoRef]) -> Result<usize> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(failure("reservation table"));
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(self.reservations.lock().unwrap().release(withdrawal_id, outputs))
    }

    async fn reserved_for(&self, withdrawal_id: &WithdrawalId) -> Result<Vec<UtxoRef>> {
        Ok(self.reservations.lock().unwrap().owned_by(withdrawal_id))
    }
}

#[derive(Default)]
pub struct FakeConsensus {
    pub established: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_established: AtomicBool,
    pub fail_withdraw: AtomicBool,
    pub create_calls: AtomicUsize,
    pub withdraw_calls: AtomicUsize,
}

#[async_trait]
impl ConsensusProvider for FakeConsensus {
    async fn create_consensus_data(&self, details: &WithdrawalDetails) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(UtxoError::InsufficientFunds {
                required: details.amount_sat,
                available: 0,
            }
            .into());
        }
        Ok(())
    }

    async fn get_consensus(
        &self,
        _withdrawal_id: &WithdrawalId,
    ) -> Result<(WithdrawalDetails, Vec<WithdrawalConsensus>)> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(failure("consensus"));
        }
        let d = details(40_000);
        let proposal = WithdrawalConsensus::new(d.clone(), vec![utxo(&txid(1), 0, 100_000, 6)], 100);
        Ok((d, vec![proposal]))
    }

    async fn has_been_established(&self, _withdrawal_id: &WithdrawalId) -> Result<bool> {
        if self.fail_established.load(Ordering::SeqCst) {
            return Err(failure("established marker"));
        }
        Ok(self.established.load(Ordering::SeqCst))
    }

    async fn withdraw(
        &self,
        _details: &WithdrawalDetails,
        _consensus: &[WithdrawalConsensus],
    ) -> Result<WithdrawOutcome> {
        self.withdraw_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_withdraw.load(Ordering::SeqCst) {
            return Err(failure("transaction storage"));
        }
        self.established.store(true, Ordering::SeqCst);
        Ok(WithdrawOutcome::Pending)
    }
}

#[derive(Default)]
pub struct FakeBroadcasts {
    broadcast: AtomicBool,
    rolled_back: AtomicBool,
    in_flight: AtomicBool,
    pub fail_check: AtomicBool,
    pub fail_mark: AtomicBool,
    pub mark_calls: AtomicUsize,
}

impl FakeBroadcasts {
    pub fn set_broadcast(&self, value: bool) {
        self.broadcast.store(value, Ordering::SeqCst);
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast.load(Ordering::SeqCst)
    }

    pub fn set_rolled_back(&self, value: bool) {
        self.rolled_back.store(value, Ordering::SeqCst);
    }

    fn check(&self) -> Result<bool> {
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(failure("broadcast ledger"));
        }
        Ok(self.is_broadcast())
    }
}

#[async_trait]
impl BroadcastsProvider for FakeBroadcasts {
    async fn has_been_broadcast(&self, _details: &WithdrawalDetails) -> Result<bool> {
        self.check()
    }

    async fn has_been_rolled_back(&self, _withdrawal_id: &WithdrawalId) -> Result<bool> {
        self.check()?;
        Ok(self.rolled_back.load(Ordering::SeqCst))
    }

    async fn state(&self, _withdrawal_id: &WithdrawalId) -> Result<FenceState> {
        if self.check()? {
            Ok(FenceState::Done)
        } else if self.rolled_back.load(Ordering::SeqCst) {
            Ok(FenceState::RolledBack)
        } else if self.in_flight.load(Ordering::SeqCst) {
            Ok(FenceState::InProgress)
        } else {
            Ok(FenceState::NotStarted)
        }
    }

    async fn try_begin(&self, _withdrawal_id: &WithdrawalId) -> Result<bool> {
        if self.check()? || self.rolled_back.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(!self.in_flight.swap(true, Ordering::SeqCst))
    }

    async fn finish(&self, _withdrawal_id: &WithdrawalId) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn mark_as_broadcast(&self, _details: &WithdrawalDetails, _btc_txid: &str) -> Result<()> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(failure("broadcast ledger"));
        }
        self.set_broadcast(true);
        Ok(())
    }
}

/// Sign collector reporting a configurable number of contributions
#[derive(Default)]
pub struct FakeSignCollector {
    pub contributions: AtomicUsize,
    pub sign_calls: AtomicUsize,
    pub fail_sign: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_merge: AtomicBool,
}

#[async_trait]
impl SignCollector for FakeSignCollector {
    async fn sign_and_save(&self, _record: &TransactionRecord) -> Result<()> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign.load(Ordering::SeqCst) {
            return Err(failure("signature ledger"));
        }
        self.contributions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_signatures(&self, withdrawal_id: &WithdrawalId) -> Result<Vec<SignatureContribution>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(failure("signature ledger"));
        }
        let count = self.contributions.load(Ordering::SeqCst);
        Ok((0..count)
            .map(|i| SignatureContribution {
                withdrawal_id: withdrawal_id.clone(),
                signer_pubkey: format!("signer-{}", i),
                signatures: vec![InputSignature {
                    input_index: 0,
                    signature: String::new(),
                }],
            })
            .collect())
    }

    fn threshold(&self) -> usize {
        2
    }

    fn merge(&self, record: &TransactionRecord, _contributions: &[SignatureContribution]) -> Result<Transaction> {
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(BridgeError::Signing(crate::withdrawal::SignerError::NotEnoughSignatures {
                input: 0,
                have: 1,
                need: 2,
            }));
        }
        Ok(record.transaction()?)
    }
}

#[derive(Default)]
pub struct FakeTxStorage {
    record: Mutex<Option<TransactionRecord>>,
    pub fail_get: AtomicBool,
}

impl FakeTxStorage {
    pub fn with_record(record: TransactionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            fail_get: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TransactionStorage for FakeTxStorage {
    async fn save(&self, record: &TransactionRecord) -> Result<bool> {
        let mut stored = self.record.lock().unwrap();
        if stored.is_some() {
            return Ok(false);
        }
        *stored = Some(record.clone());
        Ok(true)
    }

    async fn get(&self, _withdrawal_id: &WithdrawalId) -> Result<Option<TransactionRecord>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(failure("transaction storage"));
        }
        Ok(self.record.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeRollback {
    reasons: Mutex<Vec<String>>,
}

impl FakeRollback {
    pub fn calls(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl RollbackService for FakeRollback {
    async fn rollback(&self, _withdrawal_id: &WithdrawalId, _details: Option<&WithdrawalDetails>, reason: &str) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}
