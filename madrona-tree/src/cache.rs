use std::sync::{Arc, Mutex};

use sieve_cache::SieveCache;

use crate::{MadronaTreeError, Node, TreeKey, TreeValue};

/// Caches deserialized nodes from (possibly several) stores.
///
/// Cache keys are `store-prefix/hash`, so identical hashes living on
/// different backends stay apart. A cache may be shared by any number of
/// trees; besides speeding up loads it lets a flush skip re-storing nodes
/// that some earlier version already persisted, so it should be invalidated
/// or replaced when the backing store changes out from under it.
pub trait NodeCache<K, V>: Send + Sync
where
    K: TreeKey,
    V: TreeValue,
{
    /// Adds a freshly loaded or freshly persisted node to the cache.
    fn add(&self, key: String, node: Arc<Node<K, V>>);

    /// Whether the node with the given key has already been persisted.
    fn contains(&self, key: &str) -> bool;

    /// Retrieves the already-deserialized node with the given key, if cached.
    fn get(&self, key: &str) -> Option<Arc<Node<K, V>>>;
}

/// A size-bounded [`NodeCache`] over a [`SieveCache`].
pub struct SieveNodeCache<K, V>
where
    K: TreeKey,
    V: TreeValue,
{
    entries: Mutex<SieveCache<String, Arc<Node<K, V>>>>,
}

impl<K, V> SieveNodeCache<K, V>
where
    K: TreeKey,
    V: TreeValue,
{
    /// Creates a cache holding up to `capacity` nodes.
    pub fn new(capacity: usize) -> Result<Self, MadronaTreeError> {
        let entries = SieveCache::new(capacity).map_err(|error| {
            MadronaTreeError::Config(format!("could not initialize node cache: {error}"))
        })?;
        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    /// A cache ready for [`crate::TreeConfig::cache`].
    pub fn shared(capacity: usize) -> Result<Arc<Self>, MadronaTreeError> {
        Ok(Arc::new(Self::new(capacity)?))
    }
}

impl<K, V> NodeCache<K, V> for SieveNodeCache<K, V>
where
    K: TreeKey,
    V: TreeValue,
{
    fn add(&self, key: String, node: Arc<Node<K, V>>) {
        let mut entries = self.entries.lock().expect("node cache lock poisoned");
        entries.insert(key, node);
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get(&self, key: &str) -> Option<Arc<Node<K, V>>> {
        let mut entries = self.entries.lock().expect("node cache lock poisoned");
        entries.get(&key.to_owned()).cloned()
    }
}
