use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use madrona_store::{MadronaStoreError, Marshaler, StoreBackend, content_hash};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::debug;

use crate::{
    BoxFuture, Link, MadronaTreeError, Node, NodeCache, Snapshot, Tree, TreeKey, TreeValue, codec,
};

/// Upper bound on store puts in flight during a single flush.
const MAX_CONCURRENT_STORES: usize = 40;

impl<K, V, M, S> Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Serializes every dirty node into the store, bottom-up, and re-roots
    /// the tree at the resulting content hash. Returns `None` for an empty
    /// tree.
    ///
    /// Puts overlap up to a fixed concurrency; the first store error wins and
    /// suppresses the puts that have not started yet. An interrupted or
    /// failed flush leaves the in-memory tree consistent, and flushing again
    /// is safe.
    pub(crate) async fn flush(&mut self) -> Result<Option<String>, MadronaTreeError> {
        let Some(root_link) = self.root.clone() else {
            return Ok(None);
        };
        let mut queue = StoreQueue::new(Arc::clone(&self.store), self.cache.clone());
        let walked = self.store_link(&root_link, &mut queue).await;
        let stored = queue.finish().await;
        let hash = walked?;
        stored?;
        debug!(root = %hash, size = self.size, "flushed tree");
        self.root = Some(Link::Persisted(hash.clone()));
        Ok(Some(hash))
    }

    fn store_link<'a>(
        &'a self,
        link: &'a Link<K, V>,
        queue: &'a mut StoreQueue<K, V, S>,
    ) -> BoxFuture<'a, Result<String, MadronaTreeError>> {
        Box::pin(async move {
            let node = match link {
                Link::Persisted(hash) => return Ok(hash.clone()),
                Link::Inline(node) => node,
                Link::Absent => panic!("attempted to store an absent link"),
            };
            if !node.dirty {
                // Corruption check against the snapshot taken at load.
                node.validate();
                if let Some(source) = &node.source {
                    return Ok(source.clone());
                }
            }

            let mut links = Vec::with_capacity(node.links.len());
            for child in &node.links {
                match child {
                    Link::Absent => links.push(Link::Absent),
                    Link::Persisted(hash) => links.push(Link::Persisted(hash.clone())),
                    inline => {
                        let hash = self.store_link(inline, &mut *queue).await?;
                        links.push(Link::Persisted(hash));
                    }
                }
            }

            let encoded =
                codec::encode_node(&node.keys, &node.values, &links, self.format, &self.marshaler)?;
            let hash = content_hash(&encoded);
            let cache_key = format!("{}/{}", self.store.prefix(), hash);
            if let Some(cache) = &self.cache {
                if cache.contains(&cache_key) {
                    // Some earlier version already persisted this node.
                    return Ok(hash);
                }
            }
            let flushed = Arc::new(Node {
                expected: Some(Snapshot {
                    keys: node.keys.clone(),
                    values: node.values.clone(),
                }),
                keys: node.keys.clone(),
                values: node.values.clone(),
                links,
                dirty: false,
                shared: AtomicBool::new(true),
                source: Some(hash.clone()),
            });
            queue.submit(hash.clone(), encoded, cache_key, flushed).await?;
            Ok(hash)
        })
    }
}

/// A bounded pool of store puts with a first-error cell: once any put fails,
/// later submissions become no-ops and the error surfaces from `finish`.
struct StoreQueue<K, V, S>
where
    K: TreeKey,
    V: TreeValue,
    S: StoreBackend,
{
    store: Arc<S>,
    cache: Option<Arc<dyn NodeCache<K, V>>>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<Result<(), MadronaStoreError>>,
    errored: Arc<AtomicBool>,
}

impl<K, V, S> StoreQueue<K, V, S>
where
    K: TreeKey,
    V: TreeValue,
    S: StoreBackend,
{
    fn new(store: Arc<S>, cache: Option<Arc<dyn NodeCache<K, V>>>) -> Self {
        StoreQueue {
            store,
            cache,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_STORES)),
            tasks: JoinSet::new(),
            errored: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn submit(
        &mut self,
        hash: String,
        bytes: Vec<u8>,
        cache_key: String,
        node: Arc<Node<K, V>>,
    ) -> Result<(), MadronaTreeError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| MadronaStoreError::Backend("flush pool closed".into()))?;
        if self.errored.load(Ordering::Acquire) {
            return Ok(());
        }
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        let errored = Arc::clone(&self.errored);
        self.tasks.spawn(async move {
            let _permit = permit;
            match store.store(&hash, bytes).await {
                Ok(()) => {
                    if let Some(cache) = cache {
                        cache.add(cache_key, node);
                    }
                    Ok(())
                }
                Err(error) => {
                    errored.store(true, Ordering::Release);
                    Err(error)
                }
            }
        });
        Ok(())
    }

    /// Waits for every submitted put; the first failure wins.
    async fn finish(mut self) -> Result<(), MadronaTreeError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(error) => Err(MadronaStoreError::Backend(format!(
                    "store task failed: {error}"
                ))),
            };
            if let Err(error) = result {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(error) => Err(error.into()),
        }
    }
}
