use std::sync::Arc;

use madrona_store::{Marshaler, StoreBackend};

use crate::{Link, MadronaTreeError, Node, Tree, TreeKey, TreeValue};

/// One step on the path from the root to a located node.
#[derive(Clone)]
pub(crate) struct PathEntry<K, V> {
    pub(crate) node: Arc<Node<K, V>>,
    pub(crate) link_index: usize,
}

/// The outcome of locating a key: the terminal node, the slot index within
/// it, whether that slot holds the key exactly, and the path walked to get
/// there.
pub(crate) struct FoundSlot<K, V> {
    pub(crate) node: Arc<Node<K, V>>,
    pub(crate) index: usize,
    pub(crate) exact: bool,
    pub(crate) path: Vec<PathEntry<K, V>>,
}

pub(crate) struct FindOptions {
    /// The layer the key belongs on (already capped by the tree height).
    pub(crate) target_layer: u8,
    /// Create empty children while descending, for insertion.
    pub(crate) create_missing: bool,
}

impl<K, V, M, S> Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Descends from `start` (the root) towards the node that contains - or
    /// would contain - `key`, recording each step. The walk ends at an exact
    /// match, at the key's target layer, or (when not creating missing
    /// nodes) at the first empty subtree on the way.
    pub(crate) async fn find_node(
        &self,
        start: Arc<Node<K, V>>,
        key: &K,
        options: FindOptions,
    ) -> Result<FoundSlot<K, V>, MadronaTreeError> {
        let mut node = start;
        let mut height = self.height;
        let mut path = Vec::with_capacity(usize::from(height) + 1);
        loop {
            let (index, exact) = node.search(key);
            path.push(PathEntry {
                node: Arc::clone(&node),
                link_index: index,
            });
            if exact || height == options.target_layer {
                return Ok(FoundSlot {
                    node,
                    index,
                    exact,
                    path,
                });
            }
            let child = match &node.links[index] {
                Link::Absent => {
                    if options.create_missing {
                        Arc::new(Node::empty())
                    } else {
                        // The subtree that would hold the key is empty.
                        return Ok(FoundSlot {
                            node,
                            index,
                            exact: false,
                            path,
                        });
                    }
                }
                link => self.load(link).await?,
            };
            node = child;
            height -= 1;
        }
    }

    /// Rebuilds the spine after a mutation: `terminal` replaces the deepest
    /// node on `path`, each ancestor is copied with the updated child link
    /// installed, and nodes that became empty collapse to absent links all
    /// the way up. An empty root empties the tree.
    pub(crate) fn save_path(&mut self, path: &[PathEntry<K, V>], terminal: Node<K, V>) {
        let mut child = if terminal.is_empty() {
            Link::Absent
        } else {
            Link::Inline(Arc::new(terminal))
        };
        for entry in path[..path.len() - 1].iter().rev() {
            let mut parent = entry.node.to_mut();
            parent.links[entry.link_index] = child;
            child = if parent.is_empty() {
                Link::Absent
            } else {
                Link::Inline(Arc::new(parent))
            };
        }
        self.root = match child {
            Link::Absent => None,
            link => Some(link),
        };
    }
}
