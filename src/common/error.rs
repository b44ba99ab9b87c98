//! Common Error Types for the Withdrawal Node
//!
//! Provides the saga-wide error taxonomy. Layer errors (storage, coin
//! selection, signing, Esplora) convert into [`BridgeError`] with `?`.

use thiserror::Error;

use crate::bitcoin::EsploraError;
use crate::storage::StorageError;
use crate::types::TxDecodeError;
use crate::withdrawal::{BuilderError, SignerError, UtxoError};

/// Broad class of a failure, deciding how the saga reacts to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller mistake (bad address, dusty amount, unknown fee); terminal
    Validation,
    /// Insufficient or ineligible funds; terminal
    Resource,
    /// Validators disagree; stalls without rollback
    ConsensusDivergence,
    /// Ledger or network call failed; triggers conservative rollback
    Transport,
    /// Anything else
    Internal,
}

/// Root error type for the withdrawal saga
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Coin selection errors
    #[error("resource error: {0}")]
    Resource(UtxoError),

    /// Validators proposed different UTXO sets
    #[error("consensus divergence: {0}")]
    ConsensusDivergence(String),

    /// Ledger or Bitcoin network call failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Fact store errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Signing errors
    #[error("signing error: {0}")]
    Signing(#[from] SignerError),

    /// Payload (de)serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Validation(_) | BridgeError::Config(_) => ErrorKind::Validation,
            BridgeError::Resource(UtxoError::NoFeeRate) => ErrorKind::Validation,
            BridgeError::Resource(UtxoError::Wallet(_)) => ErrorKind::Transport,
            BridgeError::Resource(_) => ErrorKind::Resource,
            BridgeError::ConsensusDivergence(_) => ErrorKind::ConsensusDivergence,
            BridgeError::Transport(_) | BridgeError::Storage(_) => ErrorKind::Transport,
            BridgeError::Signing(_) | BridgeError::Serialization(_) | BridgeError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this is a retryable error
    ///
    /// Only meaningful to the transport layer; handlers never retry.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Get error code for logs and rollback records
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "VALIDATION_ERROR",
            BridgeError::Resource(_) => "RESOURCE_ERROR",
            BridgeError::ConsensusDivergence(_) => "CONSENSUS_DIVERGENCE",
            BridgeError::Transport(_) => "TRANSPORT_ERROR",
            BridgeError::Storage(_) => "STORAGE_ERROR",
            BridgeError::Signing(_) => "SIGNING_ERROR",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<UtxoError> for BridgeError {
    fn from(e: UtxoError) -> Self {
        match e {
            UtxoError::NoFeeRate => BridgeError::Validation(e.to_string()),
            other => BridgeError::Resource(other),
        }
    }
}

impl From<BuilderError> for BridgeError {
    fn from(e: BuilderError) -> Self {
        match e {
            BuilderError::InsufficientFunds { required, available } => {
                BridgeError::Resource(UtxoError::InsufficientFunds { required, available })
            }
            other => BridgeError::Validation(other.to_string()),
        }
    }
}

impl From<EsploraError> for BridgeError {
    fn from(e: EsploraError) -> Self {
        BridgeError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<TxDecodeError> for BridgeError {
    fn from(e: TxDecodeError) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BridgeError::transport("connection failed");
        assert!(err.to_string().contains("connection failed"));
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    }

    #[test]
    fn test_taxonomy() {
        let err: BridgeError = UtxoError::NoEligibleUtxo.into();
        assert_eq!(err.kind(), ErrorKind::Resource);

        let err: BridgeError = UtxoError::NoFeeRate.into();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: BridgeError = StorageError::Connection("down".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Transport);

        assert_eq!(
            BridgeError::ConsensusDivergence("w1".to_string()).kind(),
            ErrorKind::ConsensusDivergence
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::transport("timeout").is_retryable());
        assert!(!BridgeError::validation("invalid input").is_retryable());
        assert!(!BridgeError::Resource(UtxoError::NoEligibleUtxo).is_retryable());
    }
}
