//! Crypto engine — field-level encryption of domain records.
//!
//! This module provides:
//! - Canonical byte encoding of field values (`canonical`)
//! - The inline `Envelope` and the `FieldValue` sum type (`envelope`)
//! - `CryptoEngine`, which applies the field policy (`crypto_engine`)

pub mod canonical;
pub mod crypto_engine;
pub mod envelope;

pub use crypto_engine::{CryptoEngine, Record};
pub use envelope::{Envelope, FieldValue};
