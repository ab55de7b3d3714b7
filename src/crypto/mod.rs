//! Cryptographic primitives.
//!
//! This module provides:
//! - AES-256-GCM encryption and decryption (`encryption`)
//! - Argon2id passphrase-based master-key derivation (`kdf`)
//! - HKDF-based collection-key and wrapping-key derivation (`keys`)

pub mod encryption;
pub mod kdf;
pub mod keys;

pub use encryption::{decrypt, encrypt, Sealed, ALGORITHM};
pub use kdf::{derive_master_key, Argon2Params};
pub use keys::{CollectionKeyBytes, MasterKey, DERIVATION_METHOD};
