//! Session key hierarchy: master key, collection keys, rotation.
//!
//! `KeyManager` is created once per session and shared (behind an `Arc`)
//! with the crypto engine and the storage hooks. It owns the master key and
//! a cache of every usable collection key version. The cache is written
//! only by `initialize` and `rotate_collection_key`, always by swapping in
//! fully built `Arc<CollectionKey>` values, and is read everywhere else.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use super::collection_key::CollectionKey;
use super::status::{InitReport, KeyState, SecurityStatus};
use crate::config::{FieldPolicy, Settings};
use crate::crypto::kdf::{derive_master_key, Argon2Params, KEY_LEN};
use crate::crypto::keys::{MasterKey, PassphraseFingerprint};
use crate::errors::{SealError, Result};
use crate::keystore::{record_id, KeyRecord, KeyStore};

/// Secrets that exist only while the session is ready.
struct Session {
    master: MasterKey,
    wrap_key: Zeroizing<[u8; KEY_LEN]>,
    fingerprint: PassphraseFingerprint,
}

/// Every usable version of one collection's key.
#[derive(Clone)]
struct CollectionSlot {
    active: Arc<CollectionKey>,
    versions: BTreeMap<u32, Arc<CollectionKey>>,
    /// Stored versions this session's wrap key cannot open.
    unreadable: BTreeSet<u32>,
}

impl CollectionSlot {
    fn single(key: Arc<CollectionKey>) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(key.version(), Arc::clone(&key));
        Self {
            active: key,
            versions,
            unreadable: BTreeSet::new(),
        }
    }
}

struct Inner {
    state: KeyState,
    session: Option<Session>,
    cache: HashMap<String, CollectionSlot>,
    last_rotation: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// How `load_or_create` settled one collection.
enum Outcome {
    Created,
    Loaded,
    Reset,
}

/// Owner of the key hierarchy for one session.
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    params: Argon2Params,
    recover_unreadable_keys: bool,
    collections: Vec<String>,
    inner: RwLock<Inner>,
    /// Serializes `initialize`, `rotate_collection_key` and `close`.
    lifecycle: Mutex<()>,
}

impl KeyManager {
    /// Build a manager for every collection named in `policy`.
    pub fn new(store: Arc<dyn KeyStore>, params: Argon2Params, policy: &FieldPolicy) -> Self {
        Self {
            store,
            params,
            recover_unreadable_keys: false,
            collections: policy.collections().map(str::to_string).collect(),
            inner: RwLock::new(Inner {
                state: KeyState::Uninitialized,
                session: None,
                cache: HashMap::new(),
                last_rotation: None,
                last_error: None,
            }),
            lifecycle: Mutex::new(()),
        }
    }

    /// Build a manager from loaded settings.
    pub fn from_settings(store: Arc<dyn KeyStore>, settings: &Settings) -> Self {
        Self::new(store, settings.argon2_params(), &settings.field_policy())
            .recover_unreadable_keys(settings.recover_unreadable_keys)
    }

    /// Opt into replacing keys that the session passphrase cannot unwrap.
    pub fn recover_unreadable_keys(mut self, enabled: bool) -> Self {
        self.recover_unreadable_keys = enabled;
        self
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Derive the master key and load or create the active key of every
    /// known collection.
    ///
    /// Calling again with the same passphrase is a no-op. A different
    /// passphrase rebuilds the whole hierarchy. On failure the manager is
    /// left uninitialized and the error is kept for `get_security_status`.
    pub async fn initialize(&self, passphrase: &str) -> Result<InitReport> {
        let _guard = self.lifecycle.lock().await;

        {
            let inner = self.inner.read().await;
            if inner.state == KeyState::Ready {
                if let Some(session) = &inner.session {
                    if session.fingerprint.matches(passphrase.as_bytes()) {
                        return Ok(InitReport {
                            already_initialized: true,
                            ..InitReport::default()
                        });
                    }
                }
            }
        }

        self.inner.write().await.state = KeyState::Initializing;

        match self.build_hierarchy(passphrase).await {
            Ok((session, cache, last_rotation, report)) => {
                let mut inner = self.inner.write().await;
                inner.session = Some(session);
                inner.cache = cache;
                inner.last_rotation = last_rotation;
                inner.last_error = None;
                inner.state = KeyState::Ready;

                info!(
                    created = report.created.len(),
                    loaded = report.loaded.len(),
                    reset = report.reset.len(),
                    "key hierarchy initialized"
                );
                Ok(report)
            }
            Err(e) => {
                let mut inner = self.inner.write().await;
                inner.session = None;
                inner.cache.clear();
                inner.last_rotation = None;
                inner.last_error = Some(e.to_string());
                inner.state = KeyState::Uninitialized;

                warn!(error = %e, "key hierarchy initialization failed");
                Err(e)
            }
        }
    }

    async fn build_hierarchy(
        &self,
        passphrase: &str,
    ) -> Result<(
        Session,
        HashMap<String, CollectionSlot>,
        Option<DateTime<Utc>>,
        InitReport,
    )> {
        let master = self.derive_master(passphrase).await?;
        let wrap_key = Zeroizing::new(master.derive_wrap_key()?);
        let fingerprint = PassphraseFingerprint::new(passphrase.as_bytes())?;

        let mut cache = HashMap::with_capacity(self.collections.len());
        let mut report = InitReport::default();
        let mut last_rotation: Option<DateTime<Utc>> = None;

        for collection in &self.collections {
            let (slot, outcome) = self.load_or_create(&master, &wrap_key[..], collection).await?;

            // Recovery resets also start a new version and count here.
            let rotated_at = slot
                .versions
                .values()
                .filter(|k| k.version() > 1)
                .map(|k| k.created_at())
                .max();
            last_rotation = last_rotation.max(rotated_at);

            match outcome {
                Outcome::Created => report.created.push(collection.clone()),
                Outcome::Loaded => report.loaded.push(collection.clone()),
                Outcome::Reset => report.reset.push(collection.clone()),
            }
            cache.insert(collection.clone(), slot);
        }

        let session = Session {
            master,
            wrap_key,
            fingerprint,
        };
        Ok((session, cache, last_rotation, report))
    }

    /// Run Argon2id off the async worker threads.
    async fn derive_master(&self, passphrase: &str) -> Result<MasterKey> {
        if passphrase.is_empty() {
            return Err(SealError::KeyDerivation("passphrase must not be empty".into()));
        }

        let secret = Zeroizing::new(passphrase.as_bytes().to_vec());
        let params = self.params;
        let mut master_bytes = tokio::task::spawn_blocking(move || derive_master_key(&secret, &params))
            .await
            .map_err(|e| SealError::KeyDerivation(format!("derivation task failed: {e}")))??;

        let master = MasterKey::new(master_bytes);
        master_bytes.zeroize();
        Ok(master)
    }

    async fn load_or_create(
        &self,
        master: &MasterKey,
        wrap_key: &[u8],
        collection: &str,
    ) -> Result<(CollectionSlot, Outcome)> {
        let records = self.store.list(collection).await?;

        if records.is_empty() {
            let key = Arc::new(CollectionKey::new(
                collection,
                1,
                Utc::now(),
                master.derive_collection_key(collection, 1)?,
            ));
            self.store.put(&key.to_record(wrap_key)?).await?;
            debug!(collection, "created first key version");
            return Ok((CollectionSlot::single(key), Outcome::Created));
        }

        let mut versions = BTreeMap::new();
        let mut unreadable = BTreeSet::new();
        for record in &records {
            match CollectionKey::from_record(record, wrap_key) {
                Ok(key) => {
                    versions.insert(record.version, Arc::new(key));
                }
                Err(SealError::Decryption { .. }) => {
                    debug!(collection, version = record.version, "key record not unwrappable");
                    unreadable.insert(record.version);
                }
                Err(e) => return Err(e),
            }
        }

        // Highest version flagged active wins; an unflagged table falls
        // back to its newest version.
        let active_version = records
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.version)
            .max()
            .or_else(|| records.iter().map(|r| r.version).max())
            .unwrap_or(1);

        if let Some(active) = versions.get(&active_version).cloned() {
            let slot = CollectionSlot {
                active,
                versions,
                unreadable,
            };
            return Ok((slot, Outcome::Loaded));
        }

        if !self.recover_unreadable_keys {
            return Err(SealError::KeyDerivation(format!(
                "passphrase does not unlock the stored keys for '{collection}'"
            )));
        }

        let next = records.iter().map(|r| r.version).max().unwrap_or(0) + 1;
        let key = Arc::new(CollectionKey::new(
            collection,
            next,
            Utc::now(),
            master.derive_collection_key(collection, next)?,
        ));

        let mut batch: Vec<KeyRecord> = vec![key.to_record(wrap_key)?];
        batch.extend(records.iter().filter(|r| r.is_active).map(KeyRecord::deactivated));
        self.store.put_all(&batch).await?;

        warn!(
            collection,
            version = next,
            "stored keys unreadable with this passphrase; started a fresh key version"
        );
        versions.insert(next, Arc::clone(&key));
        Ok((
            CollectionSlot {
                active: key,
                versions,
                unreadable,
            },
            Outcome::Reset,
        ))
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// The active key of `collection`.
    pub async fn get_collection_key(&self, collection: &str) -> Result<Arc<CollectionKey>> {
        let inner = self.inner.read().await;
        inner
            .cache
            .get(collection)
            .map(|slot| Arc::clone(&slot.active))
            .ok_or_else(|| SealError::no_active_key(collection))
    }

    /// A specific, possibly inactive, key version of `collection`.
    ///
    /// Reads through to the key store for versions the cache does not hold.
    /// A version that fails to unwrap is remembered and not read again this
    /// session.
    pub async fn get_key_version(&self, collection: &str, version: u32) -> Result<Arc<CollectionKey>> {
        let not_found = || SealError::KeyNotFound {
            collection: collection.to_string(),
            version: Some(version),
        };

        {
            let inner = self.inner.read().await;
            let slot = inner
                .cache
                .get(collection)
                .ok_or_else(|| SealError::no_active_key(collection))?;
            if let Some(key) = slot.versions.get(&version) {
                return Ok(Arc::clone(key));
            }
            if slot.unreadable.contains(&version) {
                return Err(not_found());
            }
        }

        debug!(collection, version, "key version not cached; reading key store");

        let record = self
            .store
            .get(&record_id(collection, version))
            .await?
            .ok_or_else(not_found)?;

        let mut inner = self.inner.write().await;
        let unwrapped = {
            let session = inner.session.as_ref().ok_or(SealError::NotInitialized)?;
            CollectionKey::from_record(&record, &session.wrap_key[..])
        };
        let Some(slot) = inner.cache.get_mut(collection) else {
            return Err(SealError::no_active_key(collection));
        };
        match unwrapped {
            Ok(key) => {
                let key = Arc::new(key);
                slot.versions.entry(version).or_insert_with(|| Arc::clone(&key));
                Ok(key)
            }
            Err(e) => {
                debug!(collection, version, error = %e, "key version not unwrappable");
                slot.unreadable.insert(version);
                Err(not_found())
            }
        }
    }

    // ------------------------------------------------------------------
    // Rotation
    // ------------------------------------------------------------------

    /// Create and activate the next key version of `collection`.
    ///
    /// The new record and the deactivated previous record are persisted
    /// together before the cache is touched; if persistence fails the
    /// previous active key stays in place.
    pub async fn rotate_collection_key(&self, collection: &str) -> Result<Arc<CollectionKey>> {
        let _guard = self.lifecycle.lock().await;

        let cached_max = {
            let inner = self.inner.read().await;
            if !matches!((&inner.state, &inner.session), (KeyState::Ready, Some(_))) {
                return Err(SealError::NotInitialized);
            }
            inner
                .cache
                .get(collection)
                .ok_or_else(|| SealError::no_active_key(collection))?
                .versions
                .keys()
                .next_back()
                .copied()
                .unwrap_or(0)
        };

        let records = self.store.list(collection).await?;
        let stored_max = records.iter().map(|r| r.version).max().unwrap_or(0);
        let next = stored_max.max(cached_max) + 1;

        // `lifecycle` is held, so the session cannot close in between.
        let (new_key, new_record) = {
            let inner = self.inner.read().await;
            let session = inner.session.as_ref().ok_or(SealError::NotInitialized)?;
            let key = Arc::new(CollectionKey::new(
                collection,
                next,
                Utc::now(),
                session.master.derive_collection_key(collection, next)?,
            ));
            let record = key.to_record(&session.wrap_key[..])?;
            (key, record)
        };

        let mut batch = vec![new_record];
        batch.extend(records.iter().filter(|r| r.is_active).map(KeyRecord::deactivated));
        self.store.put_all(&batch).await?;

        let mut inner = self.inner.write().await;
        if let Some(slot) = inner.cache.get_mut(collection) {
            slot.versions.insert(new_key.version(), Arc::clone(&new_key));
            slot.active = Arc::clone(&new_key);
        }
        inner.last_rotation = Some(new_key.created_at());

        info!(collection, version = new_key.version(), "rotated collection key");
        Ok(new_key)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Every persisted record of `collection`, in creation order.
    pub async fn get_key_history(&self, collection: &str) -> Result<Vec<KeyRecord>> {
        self.store.list(collection).await
    }

    /// Read-only summary of the hierarchy.
    pub async fn get_security_status(&self) -> SecurityStatus {
        let inner = self.inner.read().await;
        SecurityStatus {
            initialized: inner.state == KeyState::Ready,
            state: inner.state,
            total_keys: inner.cache.values().map(|s| s.versions.len()).sum(),
            last_rotation: inner.last_rotation,
            collections: self.collections.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    pub async fn state(&self) -> KeyState {
        self.inner.read().await.state
    }

    /// Collections this manager keeps keys for.
    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    /// End the session: drop (and zero) the master key and every cached key.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        let mut inner = self.inner.write().await;
        inner.session = None;
        inner.cache.clear();
        inner.state = KeyState::Uninitialized;
        debug!("key session closed");
    }
}
