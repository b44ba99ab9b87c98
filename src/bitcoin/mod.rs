//! Bitcoin Infrastructure Module
//!
//! - Esplora API client for blockchain interaction
//! - Wallet UTXO source and broadcast relay used by the saga

pub mod client;
pub mod network;

// Re-exports for convenience
pub use client::{
    is_already_known, pick_fee_rate, EsploraClient, EsploraError, EsploraTxStatus, UtxoInfo,
    MAINNET_URL, TESTNET_URL,
};
pub use network::{BtcNetwork, EsploraNetwork, EsploraWallet, UnspentSource};
