//! Fee Model
//!
//! Size-based fee estimation for P2WSH multisig spends and the current fee
//! rate shared by every handler.

use std::sync::{Arc, RwLock};

/// Estimated virtual bytes added by one multisig input
pub const BYTES_PER_INPUT: u64 = 180;
/// Estimated bytes of one output
pub const BYTES_PER_OUTPUT: u64 = 34;
/// Version, locktime and counts
pub const TX_OVERHEAD_BYTES: u64 = 10;
/// Outputs budgeted by coin selection (destination + change)
pub const SELECTION_OUTPUTS: usize = 2;

/// Fee for a transaction of the given shape
pub fn tx_fee(inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    let vbytes = inputs as u64 * BYTES_PER_INPUT + outputs as u64 * BYTES_PER_OUTPUT + TX_OVERHEAD_BYTES;
    vbytes.saturating_mul(fee_rate)
}

/// Fee coin selection budgets for `inputs` inputs
pub fn selection_fee(inputs: usize, fee_rate: u64) -> u64 {
    tx_fee(inputs, SELECTION_OUTPUTS, fee_rate)
}

/// Smallest value worth spending at this rate
pub fn dust_threshold(fee_rate: u64) -> u64 {
    fee_rate.saturating_mul(BYTES_PER_INPUT)
}

pub fn is_dust(value_sat: u64, fee_rate: u64) -> bool {
    value_sat < dust_threshold(fee_rate)
}

/// Source of the current fee rate (sat/vB)
pub trait FeeRateProvider: Send + Sync {
    /// `None` while no rate is known
    fn current(&self) -> Option<u64>;
}

/// Fixed fee rate
#[derive(Debug, Clone, Copy)]
pub struct StaticFeeRate(pub u64);

impl FeeRateProvider for StaticFeeRate {
    fn current(&self) -> Option<u64> {
        Some(self.0)
    }
}

/// Fee rate refreshed in the background
#[derive(Debug, Clone, Default)]
pub struct CurrentFeeRate {
    rate: Arc<RwLock<Option<u64>>>,
}

impl CurrentFeeRate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, rate: u64) {
        if let Ok(mut guard) = self.rate.write() {
            *guard = Some(rate);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.rate.write() {
            *guard = None;
        }
    }
}

impl FeeRateProvider for CurrentFeeRate {
    fn current(&self) -> Option<u64> {
        self.rate.read().ok().and_then(|guard| *guard)
    }
}

/// Shared handle used by the node
pub type SharedFeeRate = Arc<dyn FeeRateProvider>;
