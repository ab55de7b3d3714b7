//! Canonical, type-preserving byte encoding of field values.
//!
//! Values are encoded as JSON text. `serde_json` is built with
//! `arbitrary_precision`, so numbers keep their exact decimal text and
//! never pass through `f64`; `preserve_order` keeps nested object keys in
//! their original order. Decoding the bytes yields a value equal to the
//! one that was encoded.

use serde_json::Value;

use crate::errors::{SealError, Result};

/// Encode a value for encryption. `null` is rejected: there is nothing
/// to protect and the object transforms skip null fields.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    if value.is_null() {
        return Err(SealError::UnsupportedValue("null cannot be encrypted".into()));
    }
    serde_json::to_vec(value).map_err(|e| SealError::Serialization(format!("encode field: {e}")))
}

/// Decode bytes produced by `encode`.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| SealError::Serialization(format!("decode field: {e}")))
}
