use thiserror::Error;

/// All errors that can occur in the encryption core.
#[derive(Debug, Error)]
pub enum SealError {
    // --- Key lifecycle errors ---
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("{}", key_not_found_message(.collection, .version))]
    KeyNotFound {
        collection: String,
        version: Option<u32>,
    },

    #[error("Key manager is not initialized — call initialize() with the session passphrase first")]
    NotInitialized,

    // --- Field crypto errors ---
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed for collection '{collection}' — wrong key or tampered ciphertext")]
    Decryption { collection: String },

    #[error("Malformed encrypted envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    // --- Key store errors ---
    #[error("Key store error: {0}")]
    Storage(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    Config(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn key_not_found_message(collection: &str, version: &Option<u32>) -> String {
    match version {
        Some(v) => format!("No key version {v} for collection '{collection}'"),
        None => format!("No active key for collection '{collection}' — was it initialized?"),
    }
}

impl SealError {
    /// Build a `KeyNotFound` for the active key of a collection.
    pub fn no_active_key(collection: &str) -> Self {
        SealError::KeyNotFound {
            collection: collection.to_string(),
            version: None,
        }
    }

    /// Build a `Decryption` error scoped to a collection.
    pub fn decryption(collection: &str) -> Self {
        SealError::Decryption {
            collection: collection.to_string(),
        }
    }
}

/// Convenience type alias for results in this crate.
pub type Result<T> = std::result::Result<T, SealError>;
