use std::sync::Arc;

use madrona_store::{JsonMarshaler, Marshaler, MemoryStore, StoreBackend};
use tracing::debug;

use crate::{
    BoxFuture, CallbackError, Link, MadronaTreeError, Node, NodeCache, NodeFormat, TreeKey,
    TreeValue, codec,
    path::FindOptions,
};

/// How many entries per node a tree will normally have.
pub const DEFAULT_BRANCH_FACTOR: u32 = 16;

/// Tells an iteration whether to keep going after a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Deliver the next entry.
    Continue,
    /// End the iteration cleanly; the callback is not invoked again.
    Stop,
}

/// Initial parameters for a tree that would be painful to change after the
/// tree has data.
#[derive(Clone, Copy, Debug)]
pub struct TreeOptions {
    /// Target number of entries per node.
    pub branch_factor: u32,
    /// How nodes are laid out on the wire.
    pub node_format: NodeFormat,
}

impl Default for TreeOptions {
    fn default() -> Self {
        TreeOptions {
            branch_factor: DEFAULT_BRANCH_FACTOR,
            node_format: NodeFormat::default(),
        }
    }
}

/// Everything a tree needs besides its shape: the store its nodes persist to,
/// the marshaler for keys and values, and an optional shared node cache.
pub struct TreeConfig<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Stores and loads serialized nodes.
    pub store: S,
    /// Converts individual keys and values to and from bytes.
    pub marshaler: M,
    /// Caches deserialized nodes; may be shared across trees.
    pub cache: Option<Arc<dyn NodeCache<K, V>>>,
}

/// An immutable, versioned, diffable ordered map realized as a Merkle Search
/// Tree.
///
/// The tree's shape is a pure function of its contents: any set of entries
/// produces exactly the same node structure regardless of insertion order,
/// which makes two versions comparable by node identity alone. Nodes are
/// content-addressed and structurally shared across versions; [`Clone`]
/// produces an independent tree in O(unflushed nodes).
///
/// A single tree value accepts one operation at a time (`&mut self` for
/// mutations); concurrent use goes through clones, which share all persisted
/// state copy-on-write.
pub struct Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    pub(crate) root: Option<Link<K, V>>,
    pub(crate) branch_factor: u32,
    pub(crate) height: u8,
    pub(crate) size: u64,
    pub(crate) grow_after_size: u64,
    pub(crate) shrink_below_size: u64,
    pub(crate) marshaler: M,
    pub(crate) store: Arc<S>,
    pub(crate) cache: Option<Arc<dyn NodeCache<K, V>>>,
    pub(crate) format: NodeFormat,
}

impl<K, V> Tree<K, V, JsonMarshaler, MemoryStore>
where
    K: TreeKey,
    V: TreeValue,
{
    /// A tree for use as an in-memory data structure, persisted (if ever) to
    /// a private in-memory store.
    pub fn in_memory() -> Self {
        Self::new(TreeConfig {
            store: MemoryStore::new(),
            marshaler: JsonMarshaler,
            cache: None,
        })
    }
}

impl<K, V, M, S> Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Creates an empty tree with default options.
    pub fn new(config: TreeConfig<K, V, M, S>) -> Self {
        Self::with_options(config, TreeOptions::default())
    }

    /// Creates an empty tree with the given options.
    pub fn with_options(config: TreeConfig<K, V, M, S>, options: TreeOptions) -> Self {
        Tree {
            root: None,
            branch_factor: options.branch_factor,
            height: 0,
            size: 0,
            grow_after_size: u64::from(options.branch_factor),
            shrink_below_size: 1,
            marshaler: config.marshaler,
            store: Arc::new(config.store),
            cache: config.cache,
            format: options.node_format,
        }
    }

    /// The number of entries in the tree.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The number of levels between the leaves and the root.
    pub fn height(&self) -> u8 {
        self.height
    }

    /// The ideal number of entries that are stored per node.
    pub fn branch_factor(&self) -> u32 {
        self.branch_factor
    }

    /// The wire format this tree's nodes are persisted in.
    pub fn node_format(&self) -> NodeFormat {
        self.format
    }

    /// The store this tree persists its nodes to.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether the tree holds changes that have not been flushed.
    pub fn is_dirty(&self) -> bool {
        matches!(&self.root, Some(Link::Inline(node)) if node.dirty)
    }

    /// Adds or replaces the value for the given key.
    pub async fn insert(&mut self, key: K, value: V) -> Result<(), MadronaTreeError> {
        let target_layer = key.layer(self.branch_factor).min(self.height);
        let start = match self.root_node().await? {
            Some(node) => node,
            None => Arc::new(Node::empty()),
        };
        let found = self
            .find_node(
                start,
                &key,
                FindOptions {
                    target_layer,
                    create_missing: true,
                },
            )
            .await?;

        if found.exact {
            if found.node.values[found.index] == value {
                return Ok(());
            }
            let mut node = found.node.to_mut();
            node.values[found.index] = value;
            self.save_path(&found.path, node);
            return Ok(());
        }

        let mut node = found.node.to_mut();
        let index = found.index;
        node.keys.insert(index, key.clone());
        node.values.insert(index, value);
        let displaced = node.links[index].clone();
        node.links.insert(index, Link::Absent);
        // The displaced subtree holds keys on both sides of the new entry;
        // partition it into the entry's left and right brackets.
        let (left_link, right_link) = match &displaced {
            Link::Absent => (Link::Absent, Link::Absent),
            link => {
                let child = self.load(link).await?;
                self.split(&child, &key).await?
            }
        };
        node.links[index] = left_link;
        node.links[index + 1] = right_link;
        self.save_path(&found.path, node);

        while self.size >= self.grow_after_size {
            let Some(root) = self.root_node().await? else {
                break;
            };
            if !self.can_grow(&root) {
                break;
            }
            self.grow().await?;
        }
        self.size += 1;
        Ok(())
    }

    /// Deletes the entry with the given key and value from the tree.
    ///
    /// The value must match the stored one; a mismatch is reported the same
    /// way as a missing key.
    pub async fn delete(&mut self, key: &K, value: &V) -> Result<(), MadronaTreeError> {
        let Some(start) = self.root_node().await? else {
            return Err(MadronaTreeError::NotPresent(format!("{key:?}")));
        };
        let target_layer = key.layer(self.branch_factor).min(self.height);
        let found = self
            .find_node(
                start,
                key,
                FindOptions {
                    target_layer,
                    create_missing: false,
                },
            )
            .await?;
        if !found.exact {
            return Err(MadronaTreeError::NotPresent(format!("{key:?}")));
        }
        if found.node.values[found.index] != *value {
            return Err(MadronaTreeError::NotPresent(format!(
                "value mismatch for key {key:?} (found {:?}, wanted {value:?})",
                found.node.values[found.index]
            )));
        }

        let merged = self
            .merge(
                &found.node.links[found.index],
                &found.node.links[found.index + 1],
            )
            .await?;
        let mut node = found.node.to_mut();
        node.keys.remove(found.index);
        node.values.remove(found.index);
        node.links.remove(found.index);
        node.links[found.index] = merged;
        self.save_path(&found.path, node);

        self.size -= 1;
        while self.size < self.shrink_below_size && self.height > 0 {
            self.shrink().await?;
        }
        Ok(())
    }

    /// Retrieves the value stored for the given key.
    pub async fn get(&self, key: &K) -> Result<Option<V>, MadronaTreeError> {
        match self.locate(key).await? {
            Some((node, index)) => Ok(Some(node.values[index].clone())),
            None => Ok(None),
        }
    }

    /// Whether the tree contains the given key.
    pub async fn contains(&self, key: &K) -> Result<bool, MadronaTreeError> {
        Ok(self.locate(key).await?.is_some())
    }

    async fn locate(&self, key: &K) -> Result<Option<(Arc<Node<K, V>>, usize)>, MadronaTreeError> {
        let Some(start) = self.root_node().await? else {
            return Ok(None);
        };
        let target_layer = key.layer(self.branch_factor).min(self.height);
        let found = self
            .find_node(
                start,
                key,
                FindOptions {
                    target_layer,
                    create_missing: false,
                },
            )
            .await?;
        if found.exact {
            Ok(Some((found.node, found.index)))
        } else {
            Ok(None)
        }
    }

    /// Invokes the callback for every entry, in ascending key order.
    pub async fn iter<F>(&self, mut f: F) -> Result<(), MadronaTreeError>
    where
        F: FnMut(&K, &V) -> Result<Flow, CallbackError> + Send,
    {
        let Some(root) = self.root_node().await? else {
            return Ok(());
        };
        self.iter_node(&root, &mut f).await?;
        Ok(())
    }

    /// Seeks to the first entry whose key is greater than or equal to `key`
    /// and iterates from there, in ascending key order.
    pub async fn seek_iter<F>(&self, key: &K, mut f: F) -> Result<(), MadronaTreeError>
    where
        F: FnMut(&K, &V) -> Result<Flow, CallbackError> + Send,
    {
        let Some(start) = self.root_node().await? else {
            return Ok(());
        };
        let target_layer = key.layer(self.branch_factor).min(self.height);
        let found = self
            .find_node(
                start,
                key,
                FindOptions {
                    target_layer,
                    create_missing: false,
                },
            )
            .await?;
        for entry in found.path.iter().rev() {
            if self.seek_iter_level(&entry.node, entry.link_index, &mut f).await? == Flow::Stop {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Yields the entry at `index` (if any) and everything after it in
    /// `node`, skipping the subtree the seek descended into.
    async fn seek_iter_level<F>(
        &self,
        node: &Arc<Node<K, V>>,
        index: usize,
        f: &mut F,
    ) -> Result<Flow, MadronaTreeError>
    where
        F: FnMut(&K, &V) -> Result<Flow, CallbackError> + Send,
    {
        if index < node.keys.len() {
            match f(&node.keys[index], &node.values[index]) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return Ok(Flow::Stop),
                Err(error) => return Err(MadronaTreeError::Callback(error)),
            }
        }
        for i in index + 1..node.links.len() {
            if !node.links[i].is_absent() {
                let child = self.load(&node.links[i]).await?;
                if self.iter_node(&child, f).await? == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            if i < node.keys.len() {
                match f(&node.keys[i], &node.values[i]) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => return Ok(Flow::Stop),
                    Err(error) => return Err(MadronaTreeError::Callback(error)),
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// In-order traversal of the subtree under `node`.
    pub(crate) fn iter_node<'a, F>(
        &'a self,
        node: &'a Arc<Node<K, V>>,
        f: &'a mut F,
    ) -> BoxFuture<'a, Result<Flow, MadronaTreeError>>
    where
        F: FnMut(&K, &V) -> Result<Flow, CallbackError> + Send,
    {
        Box::pin(async move {
            for (i, link) in node.links.iter().enumerate() {
                if !link.is_absent() {
                    let child = self.load(link).await?;
                    if self.iter_node(&child, &mut *f).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                if i < node.keys.len() {
                    match f(&node.keys[i], &node.values[i]) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) => return Ok(Flow::Stop),
                        Err(error) => return Err(MadronaTreeError::Callback(error)),
                    }
                }
            }
            Ok(Flow::Continue)
        })
    }

    /// Resolves a link to its node, consulting the shared cache for
    /// persisted links.
    pub(crate) async fn load(
        &self,
        link: &Link<K, V>,
    ) -> Result<Arc<Node<K, V>>, MadronaTreeError> {
        match link {
            Link::Inline(node) => Ok(Arc::clone(node)),
            Link::Persisted(hash) => self.load_persisted(hash).await,
            Link::Absent => panic!("attempted to load an absent link"),
        }
    }

    async fn load_persisted(&self, hash: &str) -> Result<Arc<Node<K, V>>, MadronaTreeError> {
        let cache_key = format!("{}/{}", self.store.prefix(), hash);
        if let Some(cache) = &self.cache {
            if let Some(node) = cache.get(&cache_key) {
                return Ok(node);
            }
        }
        let bytes = self.store.load(hash).await?;
        let node = codec::decode_node(&bytes, self.format, &self.marshaler, hash)?;
        node.validate();
        let node = Arc::new(node);
        if let Some(cache) = &self.cache {
            cache.add(cache_key, Arc::clone(&node));
        }
        Ok(node)
    }

    pub(crate) async fn root_node(&self) -> Result<Option<Arc<Node<K, V>>>, MadronaTreeError> {
        match &self.root {
            None => Ok(None),
            Some(link) => Ok(Some(self.load(link).await?)),
        }
    }

    fn can_grow(&self, root: &Node<K, V>) -> bool {
        root.keys
            .iter()
            .any(|key| key.layer(self.branch_factor) > self.height)
    }

    /// Raises the tree one level: keys whose layer exceeds the current height
    /// move into a new root, and the runs of keys between them become its
    /// children.
    async fn grow(&mut self) -> Result<(), MadronaTreeError> {
        let Some(root) = self.root_node().await? else {
            return Ok(());
        };
        debug!(height = self.height, size = self.size, "growing tree");
        let mut new_root = Node::dirty(vec![], vec![], vec![Link::Absent]);
        let mut start = 0;
        for (i, key) in root.keys.iter().enumerate() {
            if key.layer(self.branch_factor) <= self.height {
                continue;
            }
            let last = new_root.links.len() - 1;
            new_root.links[last] = match root.extract(start, i) {
                Some(node) => Link::Inline(Arc::new(node)),
                None => Link::Absent,
            };
            new_root.keys.push(key.clone());
            new_root.values.push(root.values[i].clone());
            new_root.links.push(Link::Absent);
            start = i + 1;
        }
        if let Some(right) = root.extract(start, root.keys.len()) {
            let last = new_root.links.len() - 1;
            new_root.links[last] = Link::Inline(Arc::new(right));
        }
        new_root.validate();
        self.root = Some(Link::Inline(Arc::new(new_root)));
        self.height += 1;
        self.shrink_below_size = self.grow_after_size;
        self.grow_after_size *= u64::from(self.branch_factor);
        Ok(())
    }

    /// Collapses the root into its children, lowering the tree one level.
    async fn shrink(&mut self) -> Result<(), MadronaTreeError> {
        debug!(height = self.height, size = self.size, "shrinking tree");
        let Some(root_link) = self.root.clone() else {
            panic!("shrinking an empty tree with height {}", self.height);
        };
        let root = self.load(&root_link).await?;
        let mut new_root = Node::dirty(vec![], vec![], vec![]);
        for (i, link) in root.links.iter().enumerate() {
            if link.is_absent() {
                new_root.links.push(Link::Absent);
            } else {
                let child = self.load(link).await?;
                new_root.keys.extend_from_slice(&child.keys);
                new_root.values.extend_from_slice(&child.values);
                new_root.links.extend_from_slice(&child.links);
            }
            if i < root.keys.len() {
                new_root.keys.push(root.keys[i].clone());
                new_root.values.push(root.values[i].clone());
            }
        }
        new_root.validate();
        self.root = if new_root.is_empty() {
            None
        } else {
            Some(Link::Inline(Arc::new(new_root)))
        };
        self.height -= 1;
        if self.shrink_below_size > 1 {
            self.shrink_below_size /= u64::from(self.branch_factor);
            self.grow_after_size /= u64::from(self.branch_factor);
        }
        Ok(())
    }

    /// Splits `node` around `key` - which must not be present in it - into
    /// links to the entries strictly less than and strictly greater than
    /// `key`.
    fn split<'a>(
        &'a self,
        node: &'a Node<K, V>,
        key: &'a K,
    ) -> BoxFuture<'a, Result<(Link<K, V>, Link<K, V>), MadronaTreeError>> {
        Box::pin(async move {
            let split_index = match node.keys.binary_search(key) {
                Ok(_) => panic!("split does not handle preservation of an already-present key"),
                Err(index) => index,
            };

            let mut left = Node::dirty(
                node.keys[..split_index].to_vec(),
                node.values[..split_index].to_vec(),
                node.links[..=split_index].to_vec(),
            );
            // The boundary subtree may hold keys on either side of the split
            // key; its right half is carried over as the right node's first
            // link.
            let mut carried = Link::Absent;
            let left_end = left.links.len() - 1;
            if !left.links[left_end].is_absent() {
                let left_max = self.load(&left.links[left_end]).await?;
                let (left_max_link, too_big) = self.split(&left_max, key).await?;
                left.links[left_end] = left_max_link;
                carried = too_big;
            }
            let left_link = if left.is_empty() {
                Link::Absent
            } else {
                Link::Inline(Arc::new(left))
            };

            let mut right = Node::dirty(
                node.keys[split_index..].to_vec(),
                node.values[split_index..].to_vec(),
                node.links[split_index..].to_vec(),
            );
            right.links[0] = carried;
            if !right.links[0].is_absent() {
                let right_min = self.load(&right.links[0]).await?;
                let (too_small, right_min_link) = self.split(&right_min, key).await?;
                if !too_small.is_absent() {
                    panic!("inconsistent node order while splitting");
                }
                right.links[0] = right_min_link;
            }
            let right_link = if right.is_empty() {
                Link::Absent
            } else {
                Link::Inline(Arc::new(right))
            };
            Ok((left_link, right_link))
        })
    }

    /// Merges two adjacent subtrees that share no keys into one link.
    fn merge<'a>(
        &'a self,
        left: &'a Link<K, V>,
        right: &'a Link<K, V>,
    ) -> BoxFuture<'a, Result<Link<K, V>, MadronaTreeError>> {
        Box::pin(async move {
            if left.is_absent() {
                return Ok(right.clone());
            }
            if right.is_absent() {
                return Ok(left.clone());
            }
            let left_node = self.load(left).await?;
            let right_node = self.load(right).await?;
            let mut keys = left_node.keys.clone();
            keys.extend_from_slice(&right_node.keys);
            let mut values = left_node.values.clone();
            values.extend_from_slice(&right_node.values);
            let left_end = left_node.links.len() - 1;
            let mut links = left_node.links[..left_end].to_vec();
            links.push(Link::Absent);
            links.extend_from_slice(&right_node.links[1..]);
            let merged = self
                .merge(&left_node.links[left_end], &right_node.links[0])
                .await?;
            links[left_end] = merged;
            Ok(Link::Inline(Arc::new(Node::dirty(keys, values, links))))
        })
    }
}

/// A point-in-time clone: the copy and the source share all current nodes
/// copy-on-write and evolve independently afterwards. Costs one walk over the
/// not-yet-persisted part of the tree.
impl<K, V, M, S> Clone for Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    fn clone(&self) -> Self {
        if let Some(Link::Inline(node)) = &self.root {
            node.mark_shared();
        }
        Tree {
            root: self.root.clone(),
            branch_factor: self.branch_factor,
            height: self.height,
            size: self.size,
            grow_after_size: self.grow_after_size,
            shrink_below_size: self.shrink_below_size,
            marshaler: self.marshaler.clone(),
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
            format: self.format,
        }
    }
}
