//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the withdrawal node.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{BridgeConfig, ConfigError, Network};
pub use error::{BridgeError, ErrorKind, Result};
pub use logging::{
    init_from_config, init_logging, log_withdrawal_event, EventCategory, LogEvent, LogLevel,
    LoggingError,
};
