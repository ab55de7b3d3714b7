//! In-memory handle for one version of a collection key, and the
//! wrap/unwrap step that turns it into persisted key material.

use chrono::{DateTime, Utc};

use crate::crypto::encryption::{self, NONCE_LEN};
use crate::crypto::keys::CollectionKeyBytes;
use crate::errors::{SealError, Result};
use crate::keystore::KeyRecord;

/// One usable version of a collection key.
///
/// Immutable once built; the cache shares it behind an `Arc`.
pub struct CollectionKey {
    collection: String,
    version: u32,
    created_at: DateTime<Utc>,
    bytes: CollectionKeyBytes,
}

impl CollectionKey {
    pub fn new(
        collection: &str,
        version: u32,
        created_at: DateTime<Utc>,
        bytes: CollectionKeyBytes,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            version,
            created_at,
            bytes,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.bytes.as_bytes()
    }

    /// Export this key as a persisted record, wrapped under `wrap_key`.
    pub(crate) fn to_record(&self, wrap_key: &[u8]) -> Result<KeyRecord> {
        let sealed = encryption::encrypt(wrap_key, self.bytes.as_bytes())?;

        let mut wrapped = Vec::with_capacity(NONCE_LEN + sealed.ciphertext.len());
        wrapped.extend_from_slice(&sealed.nonce);
        wrapped.extend_from_slice(&sealed.ciphertext);

        let mut record = KeyRecord::new(&self.collection, self.version, wrapped);
        record.created_at = self.created_at;
        Ok(record)
    }

    /// Rebuild a key from its persisted record.
    ///
    /// Fails with `Decryption` when `wrap_key` did not wrap this record,
    /// i.e. the session passphrase differs from the one that created it.
    pub(crate) fn from_record(record: &KeyRecord, wrap_key: &[u8]) -> Result<Self> {
        let wrapped = &record.key_data.wrapped;
        if wrapped.len() < NONCE_LEN {
            return Err(SealError::Storage(format!(
                "{}: wrapped key material is truncated",
                record.id
            )));
        }

        let (nonce, ciphertext) = wrapped.split_at(NONCE_LEN);
        let mut raw = encryption::decrypt(wrap_key, nonce, ciphertext, &record.table_name)?;
        let bytes = CollectionKeyBytes::from_slice(&raw);
        zeroize::Zeroize::zeroize(&mut raw);

        Ok(Self::new(
            &record.table_name,
            record.version,
            record.created_at,
            bytes?,
        ))
    }
}

impl std::fmt::Debug for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionKey")
            .field("collection", &self.collection)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
