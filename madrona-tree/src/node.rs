use std::{
    cmp::Ordering,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use crate::{TreeKey, TreeValue};

/// A reference from a node to a child subtree.
#[derive(Clone, Debug)]
pub enum Link<K, V> {
    /// An empty subtree.
    Absent,
    /// A child that lives in memory and has not yet been persisted.
    Inline(Arc<Node<K, V>>),
    /// A child identified by the content hash it was persisted under.
    Persisted(String),
}

impl<K, V> Link<K, V> {
    /// Whether this link points at an empty subtree.
    pub fn is_absent(&self) -> bool {
        matches!(self, Link::Absent)
    }
}

/// Link identity: persisted links compare by hash, inline links by node
/// identity. Two links that compare equal always reach identical subtrees,
/// which is what lets the diff engine skip them unloaded.
impl<K, V> PartialEq for Link<K, V> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Link::Absent, Link::Absent) => true,
            (Link::Persisted(left), Link::Persisted(right)) => left == right,
            (Link::Inline(left), Link::Inline(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }
}

/// An in-memory tree node: `n` entries in strictly ascending key order and
/// `n + 1` child links, where `links[i]` holds the keys strictly between
/// `keys[i - 1]` and `keys[i]`.
///
/// Nodes are immutable once wrapped in an [`Arc`]; every mutation starts by
/// taking a fresh dirty copy.
#[derive(Debug)]
pub struct Node<K, V> {
    pub(crate) keys: Vec<K>,
    pub(crate) values: Vec<V>,
    pub(crate) links: Vec<Link<K, V>>,
    /// Differs from any persisted encoding.
    pub(crate) dirty: bool,
    /// Observable from more than one tree version.
    pub(crate) shared: AtomicBool,
    /// Hash this node was loaded from or last stored under.
    pub(crate) source: Option<String>,
    /// Snapshot of the loaded entries, used only for corruption checks.
    pub(crate) expected: Option<Snapshot<K, V>>,
}

/// What a node looked like when it came off the wire.
#[derive(Clone, Debug)]
pub(crate) struct Snapshot<K, V> {
    pub(crate) keys: Vec<K>,
    pub(crate) values: Vec<V>,
}

impl<K, V> Clone for Node<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Node {
            keys: self.keys.clone(),
            values: self.values.clone(),
            links: self.links.clone(),
            dirty: self.dirty,
            shared: AtomicBool::new(self.shared.load(AtomicOrdering::Relaxed)),
            source: self.source.clone(),
            expected: self.expected.clone(),
        }
    }
}

impl<K, V> Node<K, V>
where
    K: TreeKey,
    V: TreeValue,
{
    /// A node with no entries and a single absent link. Only valid as a
    /// transient intermediate while a mutation is in flight.
    pub(crate) fn empty() -> Self {
        Node {
            keys: vec![],
            values: vec![],
            links: vec![Link::Absent],
            dirty: false,
            shared: AtomicBool::new(false),
            source: None,
            expected: None,
        }
    }

    /// A freshly constructed dirty node with the given contents.
    pub(crate) fn dirty(keys: Vec<K>, values: Vec<V>, links: Vec<Link<K, V>>) -> Self {
        Node {
            keys,
            values,
            links,
            dirty: true,
            shared: AtomicBool::new(false),
            source: None,
            expected: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.links.len() == 1 && self.links[0].is_absent()
    }

    /// Copy-on-write: an owned, mutable copy with fresh metadata.
    pub(crate) fn to_mut(&self) -> Node<K, V> {
        let mut copy = self.clone();
        copy.dirty = true;
        copy.shared = AtomicBool::new(false);
        copy.source = None;
        copy.expected = None;
        copy
    }

    /// Marks every reachable in-memory node as observable from more than one
    /// tree version; mutation afterwards must copy first.
    pub(crate) fn mark_shared(self: &Arc<Self>) {
        if self.shared.swap(true, AtomicOrdering::Relaxed) {
            // Already shared, and so is everything below it.
            return;
        }
        for link in &self.links {
            if let Link::Inline(child) = link {
                child.mark_shared();
            }
        }
    }

    /// Extracts entries `[from, to)` and their bracketing links into a new
    /// dirty node, or `None` when the extracted range is empty.
    pub(crate) fn extract(&self, from: usize, to: usize) -> Option<Node<K, V>> {
        let child = Node::dirty(
            self.keys[from..to].to_vec(),
            self.values[from..to].to_vec(),
            self.links[from..=to].to_vec(),
        );
        if child.is_empty() { None } else { Some(child) }
    }

    /// Slot index for `key` within this node: checks the last key first (the
    /// common case under in-order insertion), then binary-searches. Returns
    /// the index and whether the key at that index matches exactly.
    pub(crate) fn search(&self, key: &K) -> (usize, bool) {
        let entry_count = self.keys.len();
        if entry_count == 0 {
            return (0, false);
        }
        match key.cmp(&self.keys[entry_count - 1]) {
            Ordering::Greater => (entry_count, false),
            Ordering::Equal => (entry_count - 1, true),
            Ordering::Less => match self.keys[..entry_count - 1].binary_search(key) {
                Ok(index) => (index, true),
                Err(index) => (index, false),
            },
        }
    }

    /// Panics if the node's shape or contents are corrupt. Never expected to
    /// trigger.
    pub(crate) fn validate(&self) {
        if let Some(expected) = &self.expected {
            if expected.keys != self.keys {
                panic!("node keys differ from the snapshot taken at load");
            }
            if expected.values != self.values {
                panic!("node values differ from the snapshot taken at load");
            }
        }
        if self.links.len() != self.keys.len() + 1 {
            panic!(
                "node has {} links for {} keys",
                self.links.len(),
                self.keys.len()
            );
        }
        if self.values.len() != self.keys.len() {
            panic!(
                "node has {} values for {} keys",
                self.values.len(),
                self.keys.len()
            );
        }
        for pair in self.keys.windows(2) {
            if pair[0] >= pair[1] {
                panic!("node keys are not strictly ascending");
            }
        }
    }
}
