//! SQLite-backed key table.
//!
//! Stores one row per collection key version in `<key_store_path>`
//! (by default `.ledgerseal/keys.db`). The exported key material is kept
//! as a JSON column so the record shape matches the host key table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{KeyData, KeyRecord, KeyStore};
use crate::errors::{SealError, Result};

const SELECT_COLUMNS: &str = "SELECT id, table_name, version, created_at, algorithm, key_length,
        derivation_method, is_active, key_data
 FROM key_records";

/// Key records in a local SQLite database.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open (or create) the key database at `path`.
    ///
    /// Creates the parent directory if needed and restricts the file to
    /// the owner on Unix.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| SealError::Storage(format!("open {}: {e}", path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Self::from_connection(conn)
    }

    /// A throwaway database that lives only as long as the store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SealError::Storage(format!("open in-memory: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS key_records (
                id                TEXT PRIMARY KEY,
                table_name        TEXT NOT NULL,
                version           INTEGER NOT NULL,
                created_at        TEXT NOT NULL,
                algorithm         TEXT NOT NULL,
                key_length        INTEGER NOT NULL,
                derivation_method TEXT NOT NULL,
                is_active         INTEGER NOT NULL,
                key_data          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS key_records_table
                ON key_records (table_name, version);",
        )
        .map_err(|e| SealError::Storage(format!("create schema: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SealError::Storage("key database lock poisoned".into()))
    }

    fn upsert(conn: &Connection, record: &KeyRecord) -> Result<()> {
        let key_data = serde_json::to_string(&record.key_data)
            .map_err(|e| SealError::Serialization(format!("key data: {e}")))?;

        conn.execute(
            "INSERT OR REPLACE INTO key_records
                (id, table_name, version, created_at, algorithm, key_length,
                 derivation_method, is_active, key_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.table_name,
                record.version,
                record.created_at.to_rfc3339(),
                record.algorithm,
                record.key_length,
                record.derivation_method,
                record.is_active,
                key_data,
            ],
        )
        .map_err(|e| SealError::Storage(format!("write {}: {e}", record.id)))?;

        Ok(())
    }
}

/// Raw column values; converted outside the rusqlite closure so parse
/// failures become `SealError::Storage`.
struct RawRow {
    id: String,
    table_name: String,
    version: u32,
    created_at: String,
    algorithm: String,
    key_length: u32,
    derivation_method: String,
    is_active: bool,
    key_data: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            table_name: row.get(1)?,
            version: row.get(2)?,
            created_at: row.get(3)?,
            algorithm: row.get(4)?,
            key_length: row.get(5)?,
            derivation_method: row.get(6)?,
            is_active: row.get(7)?,
            key_data: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<KeyRecord> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| SealError::Storage(format!("{}: bad created_at: {e}", self.id)))?
            .with_timezone(&Utc);
        let key_data: KeyData = serde_json::from_str(&self.key_data)
            .map_err(|e| SealError::Storage(format!("{}: bad key_data: {e}", self.id)))?;

        Ok(KeyRecord {
            id: self.id,
            table_name: self.table_name,
            version: self.version,
            created_at,
            algorithm: self.algorithm,
            key_length: self.key_length,
            derivation_method: self.derivation_method,
            is_active: self.is_active,
            key_data,
        })
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn get(&self, id: &str) -> Result<Option<KeyRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                RawRow::read,
            )
            .optional()
            .map_err(|e| SealError::Storage(format!("read {id}: {e}")))?;

        raw.map(RawRow::into_record).transpose()
    }

    async fn put(&self, record: &KeyRecord) -> Result<()> {
        let conn = self.lock()?;
        Self::upsert(&conn, record)
    }

    async fn list(&self, collection: &str) -> Result<Vec<KeyRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE table_name = ?1 ORDER BY version ASC"
            ))
            .map_err(|e| SealError::Storage(format!("list prepare: {e}")))?;

        let rows = stmt
            .query_map(params![collection], RawRow::read)
            .map_err(|e| SealError::Storage(format!("list {collection}: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| SealError::Storage(format!("row parse: {e}")))?;
            records.push(raw.into_record()?);
        }

        Ok(records)
    }

    async fn put_all(&self, records: &[KeyRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| SealError::Storage(format!("begin: {e}")))?;

        for record in records {
            Self::upsert(&tx, record)?;
        }

        tx.commit()
            .map_err(|e| SealError::Storage(format!("commit: {e}")))
    }
}
