use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{MadronaStoreError, StoreBackend};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(0);

/// A trivial [`StoreBackend`] - backed by a [`HashMap`] - where all blobs are
/// kept in memory and never persisted, usually for testing. Clones share the
/// same map.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    id: u64,
}

impl MemoryStore {
    /// Creates an empty [`MemoryStore`].
    ///
    /// Each store gets a distinct [`StoreBackend::prefix`] so that two memory
    /// stores never collide in a shared node cache.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), MadronaStoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(name.to_owned(), bytes);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, MadronaStoreError> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .cloned()
            .ok_or_else(|| MadronaStoreError::NotFound(name.to_owned()))
    }

    fn prefix(&self) -> String {
        format!("memory-{}", self.id)
    }
}
