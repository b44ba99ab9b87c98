//! Esplora API Client for Bitcoin Network Interaction
//!
//! Provides access to Bitcoin blockchain data via the Esplora API.
//! Used for listing the bridge wallet's outputs, reading the chain tip,
//! fee estimation and broadcasting withdrawal transactions.

use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";

/// Bound on every HTTP call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Node rejections that mean the transaction is already known
const ALREADY_KNOWN: [&str; 3] = [
    "txn-already-in-mempool",
    "txn-already-known",
    "already in block chain",
];

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client with custom URL
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client for Bitcoin mainnet
    pub fn new_mainnet() -> Self {
        Self::new(MAINNET_URL)
    }

    /// Create a client for Bitcoin testnet
    pub fn new_testnet() -> Self {
        Self::new(TESTNET_URL)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get transaction status
    pub async fn get_tx_status(&self, txid: &str) -> Result<EsploraTxStatus, EsploraError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(EsploraError::TxNotFound(txid.to_string()));
        }

        let status: EsploraTxStatus = resp.json().await?;
        Ok(status)
    }

    /// Get current block height
    pub async fn get_block_height(&self) -> Result<u64, EsploraError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self.client.get(&url).send().await?;

        let height: u64 = resp
            .text()
            .await?
            .trim()
            .parse()
            .map_err(|_| EsploraError::ParseError("Failed to parse block height".to_string()))?;

        Ok(height)
    }

    /// Broadcast a raw transaction
    ///
    /// A rejection saying the transaction is already known counts as
    /// acceptance; the caller's txid is returned in that case.
    pub async fn broadcast_tx(&self, tx_hex: &str, txid: &str) -> Result<String, EsploraError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self.client.post(&url).body(tx_hex.to_string()).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            if is_already_known(&error_text) {
                return Ok(txid.to_string());
            }
            return Err(EsploraError::BroadcastFailed(error_text));
        }

        Ok(resp.text().await?.trim().to_string())
    }

    /// Get address UTXOs
    pub async fn get_address_utxos(&self, address: &str) -> Result<Vec<UtxoInfo>, EsploraError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(EsploraError::AddressNotFound(address.to_string()));
        }

        let utxos: Vec<EsploraUtxo> = resp.json().await?;

        let current_height = self.get_block_height().await?;

        Ok(utxos
            .into_iter()
            .map(|u| {
                let confirmations = if let Some(height) = u.status.block_height {
                    (current_height.saturating_sub(height) + 1) as u32
                } else {
                    0
                };

                UtxoInfo {
                    txid: u.txid,
                    vout: u.vout,
                    value: u.value,
                    confirmations,
                    block_height: u.status.block_height,
                }
            })
            .collect())
    }

    /// Fee estimates keyed by confirmation target (sat/vB)
    pub async fn get_fee_estimates(&self) -> Result<HashMap<String, f64>, EsploraError> {
        let url = format!("{}/fee-estimates", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(EsploraError::ParseError(format!(
                "fee estimates unavailable: {}",
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }
}

/// Whether a broadcast rejection means the node already has the transaction
pub fn is_already_known(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    ALREADY_KNOWN.iter().any(|needle| lower.contains(needle))
}

/// Pick a whole sat/vB rate for `target` blocks from Esplora estimates
///
/// Uses the exact target when present, otherwise the nearest slower target,
/// otherwise the slowest estimate available. Never below 1.
pub fn pick_fee_rate(estimates: &HashMap<String, f64>, target: u16) -> Option<u64> {
    let mut parsed: Vec<(u16, f64)> = estimates
        .iter()
        .filter_map(|(k, v)| k.parse::<u16>().ok().map(|t| (t, *v)))
        .filter(|(_, v)| v.is_finite() && *v > 0.0)
        .collect();
    parsed.sort_by_key(|(t, _)| *t);

    let rate = parsed
        .iter()
        .find(|(t, _)| *t >= target)
        .or_else(|| parsed.last())
        .map(|(_, v)| *v)?;

    Some((rate.ceil() as u64).max(1))
}

/// Transaction status
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

/// UTXO information from Esplora
#[derive(Debug, Clone, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraTxStatus,
}

/// UTXO information
#[derive(Debug, Clone)]
pub struct UtxoInfo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub confirmations: u32,
    pub block_height: Option<u64>,
}

/// Esplora error types
#[derive(Debug, thiserror::Error)]
pub enum EsploraError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Transaction not found: {0}")]
    TxNotFound(String),

    #[error("Address not found: {0}")]
    AddressNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}
