//! Storage hooks — the seam between the record store and the crypto engine.
//!
//! The host storage engine calls an `Interceptor` for every create, partial
//! update and read on a collection. `TransparentHooks` routes those events
//! through `CryptoEngine`, so application code only ever sees plaintext.
//!
//! Writes and reads fail differently on purpose: a write that cannot be
//! fully encrypted returns an error and must not be persisted, while a read
//! returns whatever could be decrypted and leaves unreadable fields in
//! their stored form.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{CryptoEngine, Record};
use crate::errors::Result;

/// Lifecycle callbacks the host storage engine invokes per collection.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before a new record is persisted.
    async fn on_creating(&self, record: Record) -> Result<Record>;

    /// Runs before a partial change set is persisted.
    async fn on_updating(&self, changes: Record) -> Result<Record>;

    /// Runs after a record is read, before it reaches application code.
    async fn on_reading(&self, record: Record) -> Record;
}

/// Anything that accepts per-collection interceptors.
pub trait InterceptorHost {
    fn register_interceptor(&mut self, collection: &str, interceptor: Arc<dyn Interceptor>);
}

/// Encrypt-on-write, decrypt-on-read hooks for one collection.
pub struct TransparentHooks {
    collection: String,
    engine: CryptoEngine,
}

impl TransparentHooks {
    pub fn new(collection: &str, engine: CryptoEngine) -> Self {
        Self {
            collection: collection.to_string(),
            engine,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Register hooks for every collection named in the engine's policy.
    pub fn attach_all<H: InterceptorHost + ?Sized>(engine: &CryptoEngine, host: &mut H) {
        let collections: Vec<String> = engine.policy().collections().map(str::to_string).collect();
        for collection in collections {
            let hooks = Arc::new(Self::new(&collection, engine.clone()));
            host.register_interceptor(&collection, hooks);
        }
    }
}

#[async_trait]
impl Interceptor for TransparentHooks {
    async fn on_creating(&self, record: Record) -> Result<Record> {
        self.engine.encrypt_object(record, &self.collection).await
    }

    /// Only the keys present in `changes` are transformed; the stored
    /// record is never read or re-encrypted as a whole.
    async fn on_updating(&self, changes: Record) -> Result<Record> {
        self.engine.encrypt_object(changes, &self.collection).await
    }

    async fn on_reading(&self, record: Record) -> Record {
        self.engine.decrypt_object(record, &self.collection).await
    }
}

/// In-process interceptor table, keyed by collection name.
///
/// Collections without an interceptor pass through unchanged.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Interceptor>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `TransparentHooks` for every policy collection.
    pub fn for_engine(engine: &CryptoEngine) -> Self {
        let mut registry = Self::new();
        TransparentHooks::attach_all(engine, &mut registry);
        registry
    }

    pub fn get(&self, collection: &str) -> Option<&Arc<dyn Interceptor>> {
        self.hooks.get(collection)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn on_creating(&self, collection: &str, record: Record) -> Result<Record> {
        match self.hooks.get(collection) {
            Some(hooks) => hooks.on_creating(record).await,
            None => Ok(record),
        }
    }

    pub async fn on_updating(&self, collection: &str, changes: Record) -> Result<Record> {
        match self.hooks.get(collection) {
            Some(hooks) => hooks.on_updating(changes).await,
            None => Ok(changes),
        }
    }

    pub async fn on_reading(&self, collection: &str, record: Record) -> Record {
        match self.hooks.get(collection) {
            Some(hooks) => hooks.on_reading(record).await,
            None => record,
        }
    }
}

impl InterceptorHost for HookRegistry {
    fn register_interceptor(&mut self, collection: &str, interceptor: Arc<dyn Interceptor>) {
        self.hooks.insert(collection.to_string(), interceptor);
    }
}
