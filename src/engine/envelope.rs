//! Encrypted field envelope and the plain/encrypted field sum type.
//!
//! At rest an encrypted field holds an object of this shape:
//!
//! ```text
//! { "encrypted": true, "algorithm": "AES-GCM", "keyVersion": 2,
//!   "iv": "<base64 nonce>", "value": "<base64 ciphertext+tag>" }
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};

use crate::crypto::encryption::ALGORITHM;
use crate::errors::{SealError, Result};

const MARKER: &str = "encrypted";
const ATTRIBUTES: [&str; 4] = ["algorithm", "keyVersion", "iv", "value"];

/// One encrypted field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub algorithm: String,
    pub key_version: u32,
    pub iv: Vec<u8>,
    /// Ciphertext followed by the authentication tag.
    pub value: Vec<u8>,
}

impl Envelope {
    /// The inline JSON form stored in place of the plaintext.
    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(5);
        map.insert(MARKER.into(), Value::Bool(true));
        map.insert("algorithm".into(), Value::String(self.algorithm.clone()));
        map.insert("keyVersion".into(), Value::from(self.key_version));
        map.insert("iv".into(), Value::String(BASE64.encode(&self.iv)));
        map.insert("value".into(), Value::String(BASE64.encode(&self.value)));
        Value::Object(map)
    }

    /// Parse an inline envelope, requiring every attribute.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| SealError::MalformedEnvelope("envelope must be an object".into()))?;

        if map.get(MARKER).and_then(Value::as_bool) != Some(true) {
            return Err(SealError::MalformedEnvelope(
                "missing `encrypted: true` marker".into(),
            ));
        }

        let algorithm = required_str(map, "algorithm")?;
        if algorithm != ALGORITHM {
            return Err(SealError::MalformedEnvelope(format!(
                "unsupported algorithm '{algorithm}'"
            )));
        }

        let key_version = map
            .get("keyVersion")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v >= 1)
            .ok_or_else(|| {
                SealError::MalformedEnvelope("`keyVersion` must be an integer >= 1".into())
            })?;

        let iv = required_b64(map, "iv")?;
        let value = required_b64(map, "value")?;

        Ok(Self {
            algorithm: algorithm.to_string(),
            key_version,
            iv,
            value,
        })
    }

    /// Returns `true` if `value` is an object with the marker and every
    /// envelope attribute present. The attribute values are not checked.
    pub fn has_envelope_shape(value: &Value) -> bool {
        let Some(map) = value.as_object() else {
            return false;
        };
        map.get(MARKER).and_then(Value::as_bool) == Some(true)
            && ATTRIBUTES.iter().all(|key| map.contains_key(*key))
    }
}

fn required_str<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SealError::MalformedEnvelope(format!("missing `{key}`")))
}

fn required_b64(map: &Map<String, Value>, key: &str) -> Result<Vec<u8>> {
    let text = required_str(map, key)?;
    BASE64
        .decode(text)
        .map_err(|e| SealError::MalformedEnvelope(format!("`{key}` is not base64: {e}")))
}

/// A stored field value: plaintext, or an envelope to decrypt.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Plain(Value),
    Encrypted(Envelope),
}

impl FieldValue {
    /// Classify a stored value. A value with the full envelope shape must
    /// parse as an envelope; everything else, including objects that merely
    /// carry an `encrypted` key, is plaintext.
    pub fn classify(value: &Value) -> Result<Self> {
        if Envelope::has_envelope_shape(value) {
            Envelope::from_value(value).map(FieldValue::Encrypted)
        } else {
            Ok(FieldValue::Plain(value.clone()))
        }
    }
}
