//! Password-based master-key derivation using Argon2id.
//!
//! The cost parameters are fixed per deployment (`Argon2Params`, loaded
//! from `.ledgerseal.toml` or defaults). The salt is a constant shared by
//! every installation, so the same passphrase always yields the same
//! master key on any device.

use argon2::{Algorithm, Argon2, Params, Version};

use crate::errors::{SealError, Result};

/// Length of the derived key in bytes (256 bits, for AES-256).
pub const KEY_LEN: usize = 32;

/// Application-wide derivation salt.
pub const FIXED_SALT: &[u8] = b"ledgerseal-fixed-salt-v1";

/// Minimum safe memory cost in KiB (8 MB).
const MIN_MEMORY_KIB: u32 = 8_192;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB (default: 65 536 = 64 MB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Derive the 32-byte master key from a passphrase.
///
/// Rejects an empty passphrase and parameters below the safety floor.
pub fn derive_master_key(passphrase: &[u8], argon2_params: &Argon2Params) -> Result<[u8; KEY_LEN]> {
    if passphrase.is_empty() {
        return Err(SealError::KeyDerivation("passphrase must not be empty".into()));
    }
    if argon2_params.memory_kib < MIN_MEMORY_KIB {
        return Err(SealError::KeyDerivation(format!(
            "Argon2 memory_kib must be at least {MIN_MEMORY_KIB} (got {})",
            argon2_params.memory_kib
        )));
    }
    if argon2_params.iterations < 1 {
        return Err(SealError::KeyDerivation(
            "Argon2 iterations must be at least 1".into(),
        ));
    }
    if argon2_params.parallelism < 1 {
        return Err(SealError::KeyDerivation(
            "Argon2 parallelism must be at least 1".into(),
        ));
    }

    let params = Params::new(
        argon2_params.memory_kib,
        argon2_params.iterations,
        argon2_params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| SealError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase, FIXED_SALT, &mut key)
        .map_err(|e| SealError::KeyDerivation(format!("Argon2id hashing failed: {e}")))?;

    Ok(key)
}
