//! Field and object encryption against the session key hierarchy.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use zeroize::Zeroize;

use super::canonical;
use super::envelope::{Envelope, FieldValue};
use crate::config::FieldPolicy;
use crate::crypto::encryption::{self, ALGORITHM};
use crate::errors::{SealError, Result};
use crate::keys::KeyManager;

/// A domain object as stored: field name -> value.
pub type Record = Map<String, Value>;

/// Encrypts and decrypts values and records for named collections.
///
/// Cheap to clone; clones share the key manager and policy.
#[derive(Clone)]
pub struct CryptoEngine {
    keys: Arc<KeyManager>,
    policy: Arc<FieldPolicy>,
}

impl CryptoEngine {
    pub fn new(keys: Arc<KeyManager>, policy: Arc<FieldPolicy>) -> Self {
        Self { keys, policy }
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    // ------------------------------------------------------------------
    // Single values
    // ------------------------------------------------------------------

    /// Encrypt one value under the active key of `collection`.
    pub async fn encrypt_field(&self, value: &Value, collection: &str) -> Result<Envelope> {
        let mut plaintext = canonical::encode(value)?;
        let key = self.keys.get_collection_key(collection).await?;

        let sealed = encryption::encrypt(key.bytes(), &plaintext);
        plaintext.zeroize();
        let sealed = sealed?;

        Ok(Envelope {
            algorithm: ALGORITHM.to_string(),
            key_version: key.version(),
            iv: sealed.nonce.to_vec(),
            value: sealed.ciphertext,
        })
    }

    /// Validate and decrypt an inline envelope.
    pub async fn decrypt_field(&self, envelope: &Value, collection: &str) -> Result<Value> {
        let envelope = Envelope::from_value(envelope)?;
        self.decrypt_envelope(&envelope, collection).await
    }

    /// Decrypt an envelope under the key version it names.
    ///
    /// A version unknown to `collection` cannot authenticate the ciphertext
    /// and is reported as `Decryption`, the same as a tag mismatch.
    pub async fn decrypt_envelope(&self, envelope: &Envelope, collection: &str) -> Result<Value> {
        // Surfaces KeyNotFound when the collection was never initialized.
        self.keys.get_collection_key(collection).await?;

        let key = match self.keys.get_key_version(collection, envelope.key_version).await {
            Ok(key) => key,
            Err(SealError::KeyNotFound { .. }) => {
                debug!(collection, version = envelope.key_version, "no such key version");
                return Err(SealError::decryption(collection));
            }
            Err(e) => return Err(e),
        };

        let mut plaintext = encryption::decrypt(key.bytes(), &envelope.iv, &envelope.value, collection)?;
        let value = canonical::decode(&plaintext);
        plaintext.zeroize();
        value
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Encrypt every policy field of `record` that is present and non-null.
    ///
    /// Other fields are returned untouched. A field that already holds an
    /// envelope must decrypt under this collection: under the active
    /// version it is kept as is, under an older version it is re-encrypted
    /// with the active key. Any failure aborts the whole transform.
    pub async fn encrypt_object(&self, mut record: Record, collection: &str) -> Result<Record> {
        let fields = self.policy.fields(collection);
        if fields.is_empty() {
            return Ok(record);
        }

        for field in fields {
            let Some(current) = record.get(field) else {
                continue;
            };
            if current.is_null() {
                continue;
            }
            let encrypted = self.encrypt_stored(current, collection).await?;
            record.insert(field.clone(), encrypted);
        }

        Ok(record)
    }

    async fn encrypt_stored(&self, current: &Value, collection: &str) -> Result<Value> {
        let plain = match FieldValue::classify(current)? {
            FieldValue::Plain(value) => value,
            FieldValue::Encrypted(envelope) => {
                let plain = self.decrypt_envelope(&envelope, collection).await?;
                let active = self.keys.get_collection_key(collection).await?;
                if envelope.key_version == active.version() {
                    return Ok(current.clone());
                }
                plain
            }
        };
        Ok(self.encrypt_field(&plain, collection).await?.to_value())
    }

    /// Decrypt every policy field of `record` that holds an envelope.
    ///
    /// Never fails: a field that cannot be decrypted is logged and left
    /// in its stored form so the rest of the record stays readable.
    pub async fn decrypt_object(&self, mut record: Record, collection: &str) -> Record {
        for field in self.policy.fields(collection) {
            let Some(stored) = record.get(field) else {
                continue;
            };

            let envelope = match FieldValue::classify(stored) {
                Ok(FieldValue::Encrypted(envelope)) => envelope,
                Ok(FieldValue::Plain(_)) => continue,
                Err(e) => {
                    warn!(collection, field = %field, error = %e, "leaving malformed field encrypted");
                    continue;
                }
            };

            match self.decrypt_envelope(&envelope, collection).await {
                Ok(plain) => {
                    record.insert(field.clone(), plain);
                }
                Err(e) => {
                    warn!(collection, field = %field, error = %e, "leaving undecryptable field encrypted");
                }
            }
        }

        record
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    /// Encrypt a batch of records, yielding to the scheduler between
    /// records. Stops at the first failure.
    pub async fn encrypt_many(&self, records: Vec<Record>, collection: &str) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.encrypt_object(record, collection).await?);
            tokio::task::yield_now().await;
        }
        Ok(out)
    }

    /// Decrypt a batch of records, yielding between records.
    pub async fn decrypt_many(&self, records: Vec<Record>, collection: &str) -> Vec<Record> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.decrypt_object(record, collection).await);
            tokio::task::yield_now().await;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::Argon2Params;
    use crate::keystore::MemoryKeyStore;
    use serde_json::json;

    async fn engine() -> CryptoEngine {
        let policy = Arc::new(FieldPolicy::new([
            ("clients", vec!["email", "phone"]),
            ("suppliers", vec!["email"]),
            ("tags", vec![]),
        ]));
        let params = Argon2Params {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        };
        let keys = Arc::new(KeyManager::new(Arc::new(MemoryKeyStore::new()), params, &policy));
        keys.initialize("s3cr3t-pass").await.unwrap();
        CryptoEngine::new(keys, policy)
    }

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn encrypt_field_tags_active_version() {
        let engine = engine().await;
        let envelope = engine.encrypt_field(&json!("a@b.com"), "clients").await.unwrap();
        assert_eq!(envelope.key_version, 1);
        assert_eq!(envelope.algorithm, "AES-GCM");
        assert_eq!(envelope.iv.len(), 12);
    }

    #[tokio::test]
    async fn encrypt_field_rejects_null() {
        let engine = engine().await;
        let err = engine.encrypt_field(&Value::Null, "clients").await.unwrap_err();
        assert!(matches!(err, SealError::UnsupportedValue(_)));
    }

    #[tokio::test]
    async fn unknown_collection_is_key_not_found() {
        let engine = engine().await;
        let err = engine.encrypt_field(&json!(1), "payroll").await.unwrap_err();
        assert!(matches!(err, SealError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_version_is_decryption_error() {
        let engine = engine().await;
        let mut envelope = engine.encrypt_field(&json!(1), "clients").await.unwrap();
        envelope.key_version = 7;
        let err = engine.decrypt_envelope(&envelope, "clients").await.unwrap_err();
        assert!(matches!(err, SealError::Decryption { .. }));
    }

    #[tokio::test]
    async fn null_and_missing_fields_are_skipped() {
        let engine = engine().await;
        let out = engine
            .encrypt_object(record(json!({"id": "c1", "email": null})), "clients")
            .await
            .unwrap();
        assert_eq!(out, record(json!({"id": "c1", "email": null})));
    }

    #[tokio::test]
    async fn empty_policy_is_pass_through() {
        let engine = engine().await;
        let input = record(json!({"id": "t1", "label": {"encrypted": true}}));
        let out = engine.encrypt_object(input.clone(), "tags").await.unwrap();
        assert_eq!(out, input);
        assert_eq!(engine.decrypt_object(input.clone(), "tags").await, input);
    }

    #[tokio::test]
    async fn current_envelope_is_not_reencrypted() {
        let engine = engine().await;
        let once = engine
            .encrypt_object(record(json!({"email": "a@b.com"})), "clients")
            .await
            .unwrap();
        let twice = engine.encrypt_object(once.clone(), "clients").await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn old_envelope_is_reencrypted_on_write() {
        let engine = engine().await;
        let old = engine
            .encrypt_object(record(json!({"email": "a@b.com"})), "clients")
            .await
            .unwrap();
        engine.key_manager().rotate_collection_key("clients").await.unwrap();

        let rewritten = engine.encrypt_object(old, "clients").await.unwrap();
        assert_eq!(rewritten["email"]["keyVersion"], 2);

        let plain = engine.decrypt_object(rewritten, "clients").await;
        assert_eq!(plain["email"], "a@b.com");
    }

    #[tokio::test]
    async fn malformed_envelope_aborts_write_but_not_read() {
        let engine = engine().await;
        let input = record(json!({"email": {
            "encrypted": true,
            "algorithm": "AES-GCM",
            "keyVersion": 1,
            "iv": "***",
            "value": "AAAA",
        }}));

        let err = engine.encrypt_object(input.clone(), "clients").await.unwrap_err();
        assert!(matches!(err, SealError::MalformedEnvelope(_)));

        assert_eq!(engine.decrypt_object(input.clone(), "clients").await, input);
    }

    #[tokio::test]
    async fn batches_roundtrip() {
        let engine = engine().await;
        let records: Vec<Record> = (0..5)
            .map(|i| record(json!({"id": i, "email": format!("user{i}@example.com")})))
            .collect();

        let encrypted = engine.encrypt_many(records.clone(), "clients").await.unwrap();
        assert!(encrypted.iter().all(|r| Envelope::has_envelope_shape(&r["email"])));

        let decrypted = engine.decrypt_many(encrypted, "clients").await;
        assert_eq!(decrypted, records);
    }
}
