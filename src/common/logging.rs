//! Structured Logging for the Withdrawal Node
//!
//! Provides structured logging with:
//! - JSON output for log aggregation services
//! - The withdrawal id as correlation id across every saga step
//! - Per-stage withdrawal events
//!
//! # Usage
//!
//! ```rust,ignore
//! use btc_withdrawal::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?; // JSON mode for production
//!
//! tracing::info!(target: "bridge::withdrawal", withdrawal_id = %id, "Consensus proposed");
//! ```

use serde::Serialize;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// ============================================================================
// Log Levels
// ============================================================================

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

// ============================================================================
// Structured Event Types
// ============================================================================

/// Saga stage a withdrawal event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Transfer intake and validation
    Withdrawal,
    /// Proposals and quorum
    Consensus,
    /// Signature collection
    Signing,
    /// Relay to the Bitcoin network
    Broadcast,
    /// Compensation
    Rollback,
    /// Startup, shutdown, fee refresh
    System,
}

/// Structured log event
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// Event timestamp (ISO 8601)
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub message: String,
    /// Withdrawal id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Error details for error events
#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl LogEvent {
    /// Create a new log event
    pub fn new(level: LogLevel, category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: format!("{:?}", level).to_uppercase(),
            category,
            message: message.into(),
            correlation_id: None,
            data: None,
            error: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error = Some(ErrorDetails {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"error\": \"failed to serialize log\", \"message\": \"{}\"}}",
                self.message
            )
        })
    }

    /// Emit through tracing under the category target
    pub fn emit(&self) {
        let json = self.to_json();
        // tracing targets must be literals
        match (self.category, self.error.is_some()) {
            (EventCategory::Withdrawal, false) => tracing::info!(target: "bridge::withdrawal", "{}", json),
            (EventCategory::Withdrawal, true) => tracing::error!(target: "bridge::withdrawal", "{}", json),
            (EventCategory::Consensus, false) => tracing::info!(target: "bridge::consensus", "{}", json),
            (EventCategory::Consensus, true) => tracing::error!(target: "bridge::consensus", "{}", json),
            (EventCategory::Signing, false) => tracing::info!(target: "bridge::signing", "{}", json),
            (EventCategory::Signing, true) => tracing::error!(target: "bridge::signing", "{}", json),
            (EventCategory::Broadcast, false) => tracing::info!(target: "bridge::broadcast", "{}", json),
            (EventCategory::Broadcast, true) => tracing::error!(target: "bridge::broadcast", "{}", json),
            (EventCategory::Rollback, false) => tracing::warn!(target: "bridge::rollback", "{}", json),
            (EventCategory::Rollback, true) => tracing::error!(target: "bridge::rollback", "{}", json),
            (EventCategory::System, false) => tracing::info!(target: "bridge::system", "{}", json),
            (EventCategory::System, true) => tracing::error!(target: "bridge::system", "{}", json),
        }
    }
}

/// Log a saga transition for a withdrawal
#[allow(clippy::too_many_arguments)]
pub fn log_withdrawal_event(
    category: EventCategory,
    event_type: &str,
    withdrawal_id: &str,
    amount_sats: u64,
    btc_address: &str,
    success: bool,
    btc_txid: Option<&str>,
    error: Option<&str>,
) {
    let level = if success { LogLevel::Info } else { LogLevel::Error };
    let mut event = LogEvent::new(level, category, event_type)
        .with_correlation_id(withdrawal_id)
        .with_data(serde_json::json!({
            "withdrawal_id": withdrawal_id,
            "amount_sats": amount_sats,
            "btc_address": btc_address,
            "btc_txid": btc_txid,
            "success": success
        }));

    if let Some(err) = error {
        event = event.with_error("WITHDRAWAL_ERROR", err);
    }

    event.emit();
}

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let level_str = format!("{:?}", level).to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "btc_withdrawal={},bridge={}",
            level_str, level_str
        ))
    });

    if json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        );

        subscriber
            .try_init()
            .map_err(|e| LoggingError::InitFailed(e.to_string()))?;
    }

    Ok(())
}

/// Initialize logging from BridgeConfig
pub fn init_from_config(config: &super::config::BridgeConfig) -> Result<(), LoggingError> {
    init_logging(LogLevel::from(config.log_level.as_str()), config.json_logs())
}

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_serialization() {
        let event = LogEvent::new(LogLevel::Info, EventCategory::Consensus, "Quorum reached")
            .with_correlation_id("w-123")
            .with_data(serde_json::json!({"proposals": 2}));

        let json = event.to_json();
        assert!(json.contains("Quorum reached"));
        assert!(json.contains("w-123"));
        assert!(json.contains("\"consensus\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_error_details() {
        let event = LogEvent::new(LogLevel::Error, EventCategory::Rollback, "Rolled back")
            .with_error("RESOURCE_ERROR", "insufficient funds");
        let json = event.to_json();
        assert!(json.contains("RESOURCE_ERROR"));
        assert!(json.contains("\"ERROR\""));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("unknown"), LogLevel::Info);
    }
}
