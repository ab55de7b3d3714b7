//! Key management — the session key hierarchy.
//!
//! This module provides:
//! - `CollectionKey`, one usable key version (`collection_key`)
//! - `KeyManager`, owner of the master key and the key cache (`manager`)
//! - Lifecycle state and reports (`status`)

pub mod collection_key;
pub mod manager;
pub mod status;

pub use collection_key::CollectionKey;
pub use manager::KeyManager;
pub use status::{InitReport, KeyState, SecurityStatus};
