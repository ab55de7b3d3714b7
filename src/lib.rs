//! Transparent field-level encryption for a local-first business records
//! store.
//!
//! A passphrase-derived master key seeds one versioned key per collection.
//! `TransparentHooks` sit between the record store and the application:
//! policy fields are encrypted on write and decrypted on read.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod errors;
pub mod hooks;
pub mod keys;
pub mod keystore;

pub use config::{FieldPolicy, Settings};
pub use engine::{CryptoEngine, Envelope, FieldValue, Record};
pub use errors::{Result, SealError};
pub use hooks::{HookRegistry, Interceptor, InterceptorHost, TransparentHooks};
pub use keys::{CollectionKey, InitReport, KeyManager, KeyState, SecurityStatus};
pub use keystore::{KeyRecord, KeyStore, MemoryKeyStore};
#[cfg(feature = "sqlite-store")]
pub use keystore::SqliteKeyStore;
