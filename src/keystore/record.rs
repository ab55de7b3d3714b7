//! Persisted key record and its exported key material.
//!
//! One `KeyRecord` exists per collection per version. It serializes with
//! the camelCase attribute names of the host key table, and the wrapped key
//! bytes serialize as a base64 string rather than a raw byte array.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::encryption::ALGORITHM;
use crate::crypto::keys::{DERIVATION_METHOD, KEY_LEN};

/// Key length recorded in every record, in bits.
pub const KEY_LENGTH_BITS: u32 = (KEY_LEN * 8) as u32;

/// Operations a collection key may be used for.
pub const KEY_USAGES: [&str; 2] = ["encrypt", "decrypt"];

/// Exported key material: the key bytes wrapped under the session's
/// wrapping key, plus what the key is and may be used for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    /// Nonce followed by the wrapped key and its tag.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub wrapped: Vec<u8>,
    pub algorithm: String,
    pub usages: Vec<String>,
}

/// One persisted version of one collection key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// `"{collection}-v{version}"`.
    pub id: String,
    pub table_name: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub algorithm: String,
    pub key_length: u32,
    pub derivation_method: String,
    pub is_active: bool,
    pub key_data: KeyData,
}

impl KeyRecord {
    /// Build a fresh, active record for `collection` at `version`.
    pub fn new(collection: &str, version: u32, wrapped: Vec<u8>) -> Self {
        Self {
            id: record_id(collection, version),
            table_name: collection.to_string(),
            version,
            created_at: Utc::now(),
            algorithm: ALGORITHM.to_string(),
            key_length: KEY_LENGTH_BITS,
            derivation_method: DERIVATION_METHOD.to_string(),
            is_active: true,
            key_data: KeyData {
                wrapped,
                algorithm: ALGORITHM.to_string(),
                usages: KEY_USAGES.iter().map(|u| u.to_string()).collect(),
            },
        }
    }

    /// Copy of this record with the active flag cleared.
    pub fn deactivated(&self) -> Self {
        Self {
            is_active: false,
            ..self.clone()
        }
    }
}

/// Record identifier for a collection key version.
pub fn record_id(collection: &str, version: u32) -> String {
    format!("{collection}-v{version}")
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
