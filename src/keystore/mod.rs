//! Key store — persistence for versioned collection key records.
//!
//! This module provides:
//! - `KeyRecord` and `KeyData` types (`record`)
//! - The `KeyStore` trait the key manager persists through
//! - An in-process `MemoryKeyStore` (`memory`)
//! - A SQLite-backed `SqliteKeyStore` (`sqlite`, feature `sqlite-store`)
//!
//! The store is the single source of truth for key versions; the key
//! manager's cache is rebuilt from it at every `initialize`.

use async_trait::async_trait;

use crate::errors::Result;

pub mod memory;
pub mod record;
#[cfg(feature = "sqlite-store")]
pub mod sqlite;

pub use memory::MemoryKeyStore;
pub use record::{record_id, KeyData, KeyRecord};
#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteKeyStore;

/// Persistent key-value table for key records.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch one record by id (`"{collection}-v{version}"`).
    async fn get(&self, id: &str) -> Result<Option<KeyRecord>>;

    /// Insert or replace one record.
    async fn put(&self, record: &KeyRecord) -> Result<()>;

    /// Every record for `collection`, ordered by version (creation order).
    async fn list(&self, collection: &str) -> Result<Vec<KeyRecord>>;

    /// Insert or replace several records as one unit.
    ///
    /// The default writes them one at a time; stores that support
    /// transactions override this so a rotation is all-or-nothing.
    async fn put_all(&self, records: &[KeyRecord]) -> Result<()> {
        for record in records {
            self.put(record).await?;
        }
        Ok(())
    }
}
