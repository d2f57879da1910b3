#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use madrona_store::{MadronaStoreError, MemoryStore, StoreBackend};

/// A memory store that counts backend traffic, for asserting that caching
/// and diff skipping actually avoid loads.
#[derive(Clone)]
pub struct CountingStore {
    inner: MemoryStore,
    loads: Arc<AtomicU64>,
    stores: Arc<AtomicU64>,
}

impl CountingStore {
    pub fn new() -> Self {
        CountingStore {
            inner: MemoryStore::new(),
            loads: Arc::new(AtomicU64::new(0)),
            stores: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for CountingStore {
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), MadronaStoreError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store(name, bytes).await
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, MadronaStoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(name).await
    }

    fn prefix(&self) -> String {
        self.inner.prefix()
    }
}
