//! In-process key store, for tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{KeyRecord, KeyStore};
use crate::errors::{SealError, Result};

/// Key records held in a `BTreeMap` behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    records: Mutex<BTreeMap<String, KeyRecord>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all collections.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, KeyRecord>>> {
        self.records
            .lock()
            .map_err(|_| SealError::Storage("memory key store lock poisoned".into()))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, id: &str) -> Result<Option<KeyRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn put(&self, record: &KeyRecord) -> Result<()> {
        self.lock()?.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<KeyRecord>> {
        let mut list: Vec<KeyRecord> = self
            .lock()?
            .values()
            .filter(|r| r.table_name == collection)
            .cloned()
            .collect();
        list.sort_by_key(|r| r.version);
        Ok(list)
    }

    async fn put_all(&self, records: &[KeyRecord]) -> Result<()> {
        let mut guard = self.lock()?;
        for record in records {
            guard.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }
}
