//! Storage Layer Module
//!
//! Persistence for ledger facts.
//!
//! This module contains:
//! - The fact store trait
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryFactStore;
pub use sqlite::SqliteFactStore;
pub use traits::{FactStore, StorageError, StorageResult};
