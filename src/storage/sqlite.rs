//! SQLite Persistent Fact Store
//!
//! Durable ledger facts that survive restarts and can be shared by several
//! validator processes on one host. Uses connection pooling via r2d2.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

use super::traits::{FactStore, StorageError, StorageResult};
use crate::types::{Fact, Namespace, WithdrawalId};

/// SQLite-backed fact store with connection pooling
pub struct SqliteFactStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteFactStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_init(|c| c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;"));
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS facts (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                author TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (namespace, key, author)
            );

            CREATE INDEX IF NOT EXISTS idx_facts_namespace_key ON facts(namespace, key);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to a Fact
    fn row_to_fact(row: &rusqlite::Row) -> rusqlite::Result<Fact> {
        let namespace: String = row.get("namespace")?;
        let namespace = namespace.parse::<Namespace>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?;

        Ok(Fact {
            seq: row.get::<_, i64>("seq")? as u64,
            namespace,
            key: WithdrawalId::new(row.get::<_, String>("key")?),
            author: row.get("author")?,
            value: row.get("value")?,
            created_at: row.get("created_at")?,
        })
    }

    fn map_insert_error(e: rusqlite::Error, fact: &Fact) -> StorageError {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            if err.extended_code == 1555 || err.extended_code == 2067 {
                return StorageError::Duplicate(format!("{}/{}", fact.namespace, fact.key));
            }
        }
        StorageError::Database(e.to_string())
    }

    // Synchronous helper methods for the trait implementations

    fn insert_sync(&self, fact: &Fact) -> Result<u64, StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO facts (namespace, key, author, value, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                fact.namespace.as_str(),
                fact.key.as_str(),
                fact.author,
                fact.value,
                fact.created_at,
            ],
        )
        .map_err(|e| Self::map_insert_error(e, fact))?;

        Ok(conn.last_insert_rowid() as u64)
    }

    fn insert_once_sync(&self, fact: &Fact) -> Result<u64, StorageError> {
        let conn = self.conn()?;

        let rows = conn
            .execute(
                r#"
            INSERT INTO facts (namespace, key, author, value, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5
            WHERE NOT EXISTS (SELECT 1 FROM facts WHERE namespace = ?1 AND key = ?2)
            "#,
                params![
                    fact.namespace.as_str(),
                    fact.key.as_str(),
                    fact.author,
                    fact.value,
                    fact.created_at,
                ],
            )
            .map_err(|e| Self::map_insert_error(e, fact))?;

        if rows == 0 {
            return Err(StorageError::Duplicate(format!("{}/{}", fact.namespace, fact.key)));
        }

        Ok(conn.last_insert_rowid() as u64)
    }

    fn get_sync(&self, namespace: Namespace, key: &WithdrawalId) -> Result<Vec<Fact>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM facts WHERE namespace = ?1 AND key = ?2 ORDER BY seq")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![namespace.as_str(), key.as_str()], Self::row_to_fact)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::InvalidData(e.to_string()))
    }

    fn facts_after_sync(&self, seq: u64, limit: usize) -> Result<Vec<Fact>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM facts WHERE seq > ?1 ORDER BY seq LIMIT ?2")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![seq as i64, limit as i64], Self::row_to_fact)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::InvalidData(e.to_string()))
    }

    fn last_seq_sync(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;

        let seq: i64 = conn
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM facts", [], |row| row.get(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(seq as u64)
    }
}

#[async_trait]
impl FactStore for SqliteFactStore {
    async fn insert(&self, fact: &Fact) -> StorageResult<u64> {
        self.insert_sync(fact)
    }

    async fn insert_once(&self, fact: &Fact) -> StorageResult<u64> {
        self.insert_once_sync(fact)
    }

    async fn get(&self, namespace: Namespace, key: &WithdrawalId) -> StorageResult<Vec<Fact>> {
        self.get_sync(namespace, key)
    }

    async fn facts_after(&self, seq: u64, limit: usize) -> StorageResult<Vec<Fact>> {
        self.facts_after_sync(seq, limit)
    }

    async fn last_seq(&self) -> StorageResult<u64> {
        self.last_seq_sync()
    }
}
