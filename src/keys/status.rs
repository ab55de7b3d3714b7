//! Lifecycle state and read-only reports of the key manager.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of a `KeyManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    Uninitialized,
    Initializing,
    Ready,
}

/// What `initialize` did, per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Collections that got their first key version.
    pub created: Vec<String>,
    /// Collections whose active key was loaded from the key store.
    pub loaded: Vec<String>,
    /// Collections whose stored keys could not be unwrapped and were
    /// replaced by a fresh version. Data under the old versions is lost.
    pub reset: Vec<String>,
    /// The call was a no-op: the manager was already ready for this passphrase.
    pub already_initialized: bool,
}

impl InitReport {
    /// Returns `true` if any collection went through the degraded path.
    pub fn is_degraded(&self) -> bool {
        !self.reset.is_empty()
    }
}

/// Side-effect-free summary of the key hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    pub initialized: bool,
    pub state: KeyState,
    /// Key versions currently usable in this session, across collections.
    pub total_keys: usize,
    /// Creation time of the newest key version above 1. Versions started
    /// by a recovery reset are included.
    pub last_rotation: Option<DateTime<Utc>>,
    pub collections: Vec<String>,
    /// Error of the last failed `initialize`, if any.
    pub last_error: Option<String>,
}
