//! Key hierarchy helpers using HKDF-SHA256.
//!
//! From the session master key we derive:
//! - One **collection key** per `(collection, version)` pair.
//! - A **wrapping key** that encrypts collection keys at rest.
//!
//! The master key is already high-entropy (it came from Argon2id), so HKDF
//! runs with an empty salt and the context carried in `info`.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::errors::{SealError, Result};

/// Length of derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

/// Identifier of the full derivation chain, recorded in key records.
pub const DERIVATION_METHOD: &str = "ARGON2ID-HKDF-SHA256";

/// Derive the key for one version of one collection.
///
/// Binding the version into `info` makes every rotation produce fresh key
/// bytes while staying reproducible from the passphrase.
pub fn derive_collection_key(
    master_key: &[u8],
    collection: &str,
    version: u32,
) -> Result<[u8; KEY_LEN]> {
    let info = format!("ledgerseal-collection:{collection}:v{version}");
    hkdf_derive(master_key, info.as_bytes())
}

/// Derive the key that wraps collection keys before they are persisted.
pub fn derive_wrap_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"ledgerseal-wrap-key")
}

fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| SealError::KeyDerivation(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// The session master key. Zeroed when dropped and never persisted.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub fn derive_collection_key(&self, collection: &str, version: u32) -> Result<CollectionKeyBytes> {
        derive_collection_key(&self.bytes, collection, version).map(CollectionKeyBytes::new)
    }

    pub fn derive_wrap_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_wrap_key(&self.bytes)
    }
}

/// Raw bytes of one collection key version, zeroed on drop.
#[derive(Zeroize, Clone)]
#[zeroize(drop)]
pub struct CollectionKeyBytes {
    bytes: [u8; KEY_LEN],
}

impl CollectionKeyBytes {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Rebuild from unwrapped key material, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            SealError::Storage(format!(
                "key material must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for CollectionKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CollectionKeyBytes(<redacted>)")
    }
}

/// Keyed fingerprint of the session passphrase.
///
/// Lets `initialize` recognise a repeat call with the same passphrase
/// without re-running Argon2id and without keeping the passphrase itself.
/// The HMAC key is random per process, so fingerprints are useless outside
/// the session.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct PassphraseFingerprint {
    key: [u8; KEY_LEN],
    tag: [u8; KEY_LEN],
}

impl PassphraseFingerprint {
    pub fn new(passphrase: &[u8]) -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        let tag = Self::compute(&key, passphrase)?;
        Ok(Self { key, tag })
    }

    /// Constant-time check that `passphrase` is the fingerprinted one.
    pub fn matches(&self, passphrase: &[u8]) -> bool {
        match Self::compute(&self.key, passphrase) {
            Ok(tag) => tag.ct_eq(&self.tag).into(),
            Err(_) => false,
        }
    }

    fn compute(key: &[u8], passphrase: &[u8]) -> Result<[u8; KEY_LEN]> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|e| SealError::KeyDerivation(format!("HMAC init failed: {e}")))?;
        mac.update(passphrase);
        let mut tag = [0u8; KEY_LEN];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }
}
