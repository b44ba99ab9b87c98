//! Bitcoin Network Adapters
//!
//! The saga only needs two things from Bitcoin: the bridge wallet's unspent
//! outputs with their depth, and a way to relay a signed transaction.

use async_trait::async_trait;
use bitcoin::Transaction;

use super::client::EsploraClient;
use crate::common::Result;
use crate::types::UnspentOutput;

/// UTXO query surface of the bridge wallet
#[async_trait]
pub trait UnspentSource: Send + Sync {
    /// Every unspent output currently owned by the wallet
    async fn list_unspents(&self) -> Result<Vec<UnspentOutput>>;

    /// Current chain tip height
    async fn chain_height(&self) -> Result<u64>;
}

/// Relay for fully signed transactions
#[async_trait]
pub trait BtcNetwork: Send + Sync {
    /// Relay `tx` to the peer network and return its txid once accepted
    async fn broadcast(&self, tx: &Transaction) -> Result<String>;
}

/// Wallet view over one watched address via Esplora
#[derive(Debug, Clone)]
pub struct EsploraWallet {
    client: EsploraClient,
    address: String,
}

impl EsploraWallet {
    pub fn new(client: EsploraClient, address: impl Into<String>) -> Self {
        Self {
            client,
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl UnspentSource for EsploraWallet {
    async fn list_unspents(&self) -> Result<Vec<UnspentOutput>> {
        let utxos = self.client.get_address_utxos(&self.address).await?;
        Ok(utxos
            .into_iter()
            .map(|u| UnspentOutput {
                txid: u.txid,
                vout: u.vout,
                value_sat: u.value,
                confirmations: u.confirmations,
                block_height: u.block_height,
            })
            .collect())
    }

    async fn chain_height(&self) -> Result<u64> {
        Ok(self.client.get_block_height().await?)
    }
}

/// Broadcast through Esplora's `POST /tx`
#[derive(Debug, Clone)]
pub struct EsploraNetwork {
    client: EsploraClient,
}

impl EsploraNetwork {
    pub fn new(client: EsploraClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BtcNetwork for EsploraNetwork {
    async fn broadcast(&self, tx: &Transaction) -> Result<String> {
        let tx_hex = bitcoin::consensus::encode::serialize_hex(tx);
        let txid = tx.compute_txid().to_string();
        Ok(self.client.broadcast_tx(&tx_hex, &txid).await?)
    }
}
