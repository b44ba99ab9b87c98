//! Environment-based Configuration for the Withdrawal Node
//!
//! All sensitive values (keys) MUST come from environment variables,
//! never from hardcoded values. A `.env` file is honoured by the binary.
//!
//! # Required Environment Variables
//!
//! - `BRIDGE_NODE_ID` - This validator's ledger identity
//! - `BRIDGE_SIGNER_KEY` - Hex-encoded secp256k1 secret key (multisig share)
//! - `BRIDGE_VALIDATOR_PUBKEYS` - Comma-separated compressed public keys of all validators
//!
//! # Optional Settings
//!
//! - `BRIDGE_NETWORK` - "mainnet", "testnet", "signet" or "regtest" (default: "testnet")
//! - `BRIDGE_ESPLORA_URL` - Esplora API endpoint URL
//! - `BRIDGE_ACCOUNT` - Bridge account receiving withdrawal transfers
//! - `BRIDGE_MULTISIG_THRESHOLD` - Signatures required (default: n*2/3+1)
//! - `BRIDGE_CONSENSUS_QUORUM` - Equal proposals required (default: multisig threshold)
//! - `BRIDGE_MIN_CONFIRMATIONS` - Minimum depth of spendable outputs (default: 6)
//! - `BRIDGE_FEE_RATE` - Static fee rate in sat/vB (default: fetched from Esplora)
//! - `BRIDGE_FEE_REFRESH_SECS` - Fee refresh interval (default: 60)
//! - `BRIDGE_DB_PATH` - SQLite ledger path, ":memory:" for in-memory (default: "data/ledger.db")
//! - `BRIDGE_LOG_LEVEL` - Logging level (debug, info, warn, error)
//! - `BRIDGE_LOG_JSON` - Set to "1" for JSON logs

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default bridge account on the ledger
pub const DEFAULT_BRIDGE_ACCOUNT: &str = "btc_withdrawal_service@notary";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("signer key is not part of the validator set")]
    SignerNotInValidatorSet,
}

/// Bitcoin network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(ConfigError::InvalidValue(
                "BRIDGE_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Get default Esplora API for this network
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://blockstream.info/api",
            Network::Testnet => "https://blockstream.info/testnet/api",
            Network::Signet => "https://mempool.space/signet/api",
            Network::Regtest => "http://127.0.0.1:3002",
        }
    }

    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Default multisig threshold for `n` validators
pub fn default_threshold(validators: usize) -> usize {
    (validators * 2 / 3 + 1).min(validators)
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub network: Network,
    pub esplora_url: String,
    /// This validator's ledger identity
    pub node_id: String,
    /// Account receiving withdrawal transfers
    pub bridge_account: String,
    /// Hex secret key of this validator's multisig share
    pub signer_key: String,
    /// Public keys of every validator
    pub validator_pubkeys: Vec<PublicKey>,
    pub multisig_threshold: usize,
    pub consensus_quorum: usize,
    pub min_confirmations: u32,
    /// Static fee rate in sat/vB; `None` to follow Esplora estimates
    pub fee_rate: Option<u64>,
    pub fee_refresh_secs: u64,
    pub db_path: String,
    pub log_level: String,
    pub log_json: bool,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let network: Network = lookup("BRIDGE_NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .parse()?;

        let esplora_url = lookup("BRIDGE_ESPLORA_URL")
            .unwrap_or_else(|| network.default_esplora_url().to_string());

        let node_id = required("BRIDGE_NODE_ID")?;
        let bridge_account =
            lookup("BRIDGE_ACCOUNT").unwrap_or_else(|| DEFAULT_BRIDGE_ACCOUNT.to_string());
        let signer_key = required("BRIDGE_SIGNER_KEY")?;

        let validator_pubkeys = required("BRIDGE_VALIDATOR_PUBKEYS")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                PublicKey::from_str(s).map_err(|e| {
                    ConfigError::InvalidValue("BRIDGE_VALIDATOR_PUBKEYS".to_string(), e.to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let multisig_threshold = parse_or(
            &lookup,
            "BRIDGE_MULTISIG_THRESHOLD",
            default_threshold(validator_pubkeys.len()),
        )?;
        let consensus_quorum = parse_or(&lookup, "BRIDGE_CONSENSUS_QUORUM", multisig_threshold)?;
        let min_confirmations = parse_or(&lookup, "BRIDGE_MIN_CONFIRMATIONS", 6)?;
        let fee_rate = match lookup("BRIDGE_FEE_RATE") {
            Some(v) => Some(v.trim().parse().map_err(|_| {
                ConfigError::InvalidValue("BRIDGE_FEE_RATE".to_string(), "must be a number".to_string())
            })?),
            None => None,
        };
        let fee_refresh_secs = parse_or(&lookup, "BRIDGE_FEE_REFRESH_SECS", 60)?;

        let db_path = lookup("BRIDGE_DB_PATH").unwrap_or_else(|| "data/ledger.db".to_string());
        let log_level = lookup("BRIDGE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = lookup("BRIDGE_LOG_JSON").map(|v| v == "1").unwrap_or(false);

        let config = Self {
            network,
            esplora_url,
            node_id,
            bridge_account,
            signer_key,
            validator_pubkeys,
            multisig_threshold,
            consensus_quorum,
            min_confirmations,
            fee_rate,
            fee_refresh_secs,
            db_path,
            log_level,
            log_json,
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.validator_pubkeys.len();
        if n == 0 {
            return Err(ConfigError::InvalidValue(
                "BRIDGE_VALIDATOR_PUBKEYS".to_string(),
                "at least one validator is required".to_string(),
            ));
        }

        if self.multisig_threshold == 0 || self.multisig_threshold > n {
            return Err(ConfigError::InvalidValue(
                "BRIDGE_MULTISIG_THRESHOLD".to_string(),
                format!("must be between 1 and {}", n),
            ));
        }

        if self.consensus_quorum == 0 || self.consensus_quorum > n {
            return Err(ConfigError::InvalidValue(
                "BRIDGE_CONSENSUS_QUORUM".to_string(),
                format!("must be between 1 and {}", n),
            ));
        }

        let own = self.signer_public_key()?;
        if !self.validator_pubkeys.contains(&own) {
            return Err(ConfigError::SignerNotInValidatorSet);
        }

        Ok(())
    }

    /// Secret key of this node's multisig share
    pub fn signer_secret_key(&self) -> Result<SecretKey, ConfigError> {
        SecretKey::from_str(self.signer_key.trim())
            .map_err(|e| ConfigError::InvalidValue("BRIDGE_SIGNER_KEY".to_string(), e.to_string()))
    }

    pub fn signer_public_key(&self) -> Result<PublicKey, ConfigError> {
        let secp = Secp256k1::signing_only();
        Ok(PublicKey::from_secret_key(&secp, &self.signer_secret_key()?))
    }

    /// JSON logs on mainnet or when asked for
    pub fn json_logs(&self) -> bool {
        self.log_json || self.network == Network::Mainnet
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== Withdrawal Node Configuration ===");
        println!("Network: {:?}", self.network);
        println!("Esplora API: {}", self.esplora_url);
        println!("Node ID: {}", self.node_id);
        println!("Bridge Account: {}", self.bridge_account);
        println!(
            "Multisig: {}-of-{}",
            self.multisig_threshold,
            self.validator_pubkeys.len()
        );
        println!("Consensus Quorum: {}", self.consensus_quorum);
        println!("Min Confirmations: {}", self.min_confirmations);
        match self.fee_rate {
            Some(rate) => println!("Fee Rate: {} sat/vB (static)", rate),
            None => println!("Fee Rate: esplora, refreshed every {}s", self.fee_refresh_secs),
        }
        println!("Ledger DB: {}", self.db_path);
        println!("Log Level: {}", self.log_level);
        println!("=====================================");
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), "must be a number".to_string())),
        None => Ok(default),
    }
}
