use std::collections::HashMap;

use madrona_store::{Marshaler, StoreBackend};
use tracing::trace;

use crate::{
    CallbackError, Flow, Link, MadronaTreeError, Node, Tree, TreeKey, TreeValue,
};

/// A single differing entry between two tree versions.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryDiff<K, V> {
    /// The key is present only in the newer tree.
    Added {
        /// The key that appeared.
        key: K,
        /// Its value in the newer tree.
        value: V,
    },
    /// The key is present only in the older tree.
    Removed {
        /// The key that disappeared.
        key: K,
        /// Its value in the older tree.
        value: V,
    },
    /// The key is present in both trees with different values.
    Changed {
        /// The key whose value changed.
        key: K,
        /// Its value in the newer tree.
        new_value: V,
        /// Its value in the older tree.
        old_value: V,
    },
}

/// A link to an internal node present in one version but not the other.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkDiff<K, V> {
    /// The link appears in the newer tree.
    Added(Link<K, V>),
    /// The link appears only in the older tree.
    Removed(Link<K, V>),
}

type EntryCallback<'a, K, V> =
    &'a mut (dyn FnMut(EntryDiff<K, V>) -> Result<Flow, CallbackError> + Send);
type LinkCallback<'a, K, V> =
    &'a mut (dyn FnMut(LinkDiff<K, V>) -> Result<Flow, CallbackError> + Send);

enum IterItem<K, V> {
    /// A subtree still to descend into.
    Consider(Link<K, V>),
    /// A pending entry from an already-descended node.
    Yield { key: K, value: V },
}

struct ItemStack<K, V> {
    items: Vec<IterItem<K, V>>,
}

impl<K, V> ItemStack<K, V>
where
    K: TreeKey,
    V: TreeValue,
{
    fn new(root: &Option<Link<K, V>>) -> Self {
        let mut stack = ItemStack { items: vec![] };
        if let Some(link) = root {
            stack.push_link(link.clone());
        }
        stack
    }

    fn pop(&mut self) -> Option<IterItem<K, V>> {
        self.items.pop()
    }

    fn push(&mut self, item: IterItem<K, V>) {
        self.items.push(item);
    }

    fn push_link(&mut self, link: Link<K, V>) {
        if !link.is_absent() {
            self.items.push(IterItem::Consider(link));
        }
    }

    /// Unpacks a node so its links and entries pop off in key order.
    fn push_node(&mut self, node: &Node<K, V>) {
        for n in 0..node.keys.len() {
            let i = node.keys.len() - n;
            self.push_link(node.links[i].clone());
            self.items.push(IterItem::Yield {
                key: node.keys[i - 1].clone(),
                value: node.values[i - 1].clone(),
            });
        }
        self.push_link(node.links[0].clone());
    }
}

fn emit_entry<K, V>(
    callback: &mut Option<EntryCallback<'_, K, V>>,
    diff: EntryDiff<K, V>,
) -> Result<Flow, MadronaTreeError> {
    match callback {
        Some(f) => f(diff).map_err(MadronaTreeError::Callback),
        None => Ok(Flow::Continue),
    }
}

fn emit_link<K, V>(
    callback: &mut Option<LinkCallback<'_, K, V>>,
    diff: LinkDiff<K, V>,
) -> Result<Flow, MadronaTreeError> {
    match callback {
        Some(f) => f(diff).map_err(MadronaTreeError::Callback),
        None => Ok(Flow::Continue),
    }
}

impl<K, V, M, S> Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Invokes the callback once for every entry that differs from `old`, in
    /// ascending key order. Subtrees reachable through an identical link in
    /// both versions are skipped without being loaded.
    pub async fn diff_iter<F>(&self, old: &Self, mut f: F) -> Result<(), MadronaTreeError>
    where
        F: FnMut(EntryDiff<K, V>) -> Result<Flow, CallbackError> + Send,
    {
        self.diff(old, Some(&mut f as EntryCallback<'_, K, V>), None)
            .await
    }

    /// Invokes the callback once for every internal node that differs from
    /// `old`.
    pub async fn diff_links<F>(&self, old: &Self, mut f: F) -> Result<(), MadronaTreeError>
    where
        F: FnMut(LinkDiff<K, V>) -> Result<Flow, CallbackError> + Send,
    {
        self.diff(old, None, Some(&mut f as LinkCallback<'_, K, V>))
            .await
    }

    /// Two synchronized depth-first walks over `self` (the newer version) and
    /// `old`, comparing by link identity so common subtrees cost nothing.
    async fn diff(
        &self,
        old: &Self,
        mut entry_cb: Option<EntryCallback<'_, K, V>>,
        mut link_cb: Option<LinkCallback<'_, K, V>>,
    ) -> Result<(), MadronaTreeError> {
        trace!("diffing two tree versions");
        let mut notified_old: HashMap<u8, Link<K, V>> = HashMap::new();
        let mut notified_new: HashMap<u8, Link<K, V>> = HashMap::new();
        let mut old_stack = ItemStack::new(&old.root);
        let mut new_stack = ItemStack::new(&self.root);
        loop {
            let old_item = old_stack.pop();
            let new_item = new_stack.pop();
            match (old_item, new_item) {
                (None, None) => return Ok(()),
                (None, Some(IterItem::Consider(link))) => {
                    if link_cb.is_some() && !self.notified(&mut notified_new, &link).await? {
                        if emit_link(&mut link_cb, LinkDiff::Added(link.clone()))? == Flow::Stop {
                            return Ok(());
                        }
                    }
                    let node = self.load(&link).await?;
                    new_stack.push_node(&node);
                }
                (None, Some(IterItem::Yield { key, value })) => {
                    if emit_entry(&mut entry_cb, EntryDiff::Added { key, value })? == Flow::Stop {
                        return Ok(());
                    }
                }
                (Some(IterItem::Consider(link)), None) => {
                    if link_cb.is_some() && !old.notified(&mut notified_old, &link).await? {
                        if emit_link(&mut link_cb, LinkDiff::Removed(link.clone()))? == Flow::Stop {
                            return Ok(());
                        }
                    }
                    let node = old.load(&link).await?;
                    old_stack.push_node(&node);
                }
                (Some(IterItem::Yield { key, value }), None) => {
                    if emit_entry(&mut entry_cb, EntryDiff::Removed { key, value })? == Flow::Stop {
                        return Ok(());
                    }
                }
                (Some(IterItem::Consider(old_link)), Some(IterItem::Consider(new_link))) => {
                    if old_link == new_link {
                        // Identical subtrees; skip them entirely.
                        continue;
                    }
                    if link_cb.is_some() {
                        if !old.notified(&mut notified_old, &old_link).await? {
                            if emit_link(&mut link_cb, LinkDiff::Removed(old_link.clone()))?
                                == Flow::Stop
                            {
                                return Ok(());
                            }
                        }
                        if !self.notified(&mut notified_new, &new_link).await? {
                            if emit_link(&mut link_cb, LinkDiff::Added(new_link.clone()))?
                                == Flow::Stop
                            {
                                return Ok(());
                            }
                        }
                    }
                    let old_node = old.load(&old_link).await?;
                    if old_node.links.len() == 1 {
                        // Empty intermediate; descend through it.
                        old_stack.push_link(old_node.links[0].clone());
                        new_stack.push(IterItem::Consider(new_link));
                        continue;
                    }
                    let new_node = self.load(&new_link).await?;
                    if new_node.links.len() == 1 {
                        old_stack.push(IterItem::Consider(old_link));
                        new_stack.push_link(new_node.links[0].clone());
                        continue;
                    }
                    // Expand whichever side starts lower in the key space;
                    // the other is reconsidered against its contents.
                    match old_node.keys[0].cmp(&new_node.keys[0]) {
                        std::cmp::Ordering::Less => {
                            old_stack.push_node(&old_node);
                            new_stack.push(IterItem::Consider(new_link));
                        }
                        std::cmp::Ordering::Greater => {
                            old_stack.push(IterItem::Consider(old_link));
                            new_stack.push_node(&new_node);
                        }
                        std::cmp::Ordering::Equal => {
                            old_stack.push_node(&old_node);
                            new_stack.push_node(&new_node);
                        }
                    }
                }
                (Some(IterItem::Consider(old_link)), Some(new_item)) => {
                    if link_cb.is_some() && !old.notified(&mut notified_old, &old_link).await? {
                        if emit_link(&mut link_cb, LinkDiff::Removed(old_link.clone()))?
                            == Flow::Stop
                        {
                            return Ok(());
                        }
                    }
                    let node = old.load(&old_link).await?;
                    old_stack.push_node(&node);
                    new_stack.push(new_item);
                }
                (Some(old_item), Some(IterItem::Consider(new_link))) => {
                    if link_cb.is_some() && !self.notified(&mut notified_new, &new_link).await? {
                        if emit_link(&mut link_cb, LinkDiff::Added(new_link.clone()))? == Flow::Stop
                        {
                            return Ok(());
                        }
                    }
                    let node = self.load(&new_link).await?;
                    old_stack.push(old_item);
                    new_stack.push_node(&node);
                }
                (
                    Some(IterItem::Yield {
                        key: old_key,
                        value: old_value,
                    }),
                    Some(IterItem::Yield {
                        key: new_key,
                        value: new_value,
                    }),
                ) => match old_key.cmp(&new_key) {
                    std::cmp::Ordering::Less => {
                        new_stack.push(IterItem::Yield {
                            key: new_key,
                            value: new_value,
                        });
                        if emit_entry(
                            &mut entry_cb,
                            EntryDiff::Removed {
                                key: old_key,
                                value: old_value,
                            },
                        )? == Flow::Stop
                        {
                            return Ok(());
                        }
                    }
                    std::cmp::Ordering::Greater => {
                        old_stack.push(IterItem::Yield {
                            key: old_key,
                            value: old_value,
                        });
                        if emit_entry(
                            &mut entry_cb,
                            EntryDiff::Added {
                                key: new_key,
                                value: new_value,
                            },
                        )? == Flow::Stop
                        {
                            return Ok(());
                        }
                    }
                    std::cmp::Ordering::Equal => {
                        if old_value != new_value {
                            if emit_entry(
                                &mut entry_cb,
                                EntryDiff::Changed {
                                    key: new_key,
                                    new_value,
                                    old_value,
                                },
                            )? == Flow::Stop
                            {
                                return Ok(());
                            }
                        }
                    }
                },
            }
        }
    }

    /// The same subtree can be reached through different empty intermediates,
    /// so repeated notifications for a link at the same height are
    /// suppressed.
    async fn notified(
        &self,
        seen: &mut HashMap<u8, Link<K, V>>,
        link: &Link<K, V>,
    ) -> Result<bool, MadronaTreeError> {
        let height = self.link_height(link).await?;
        if seen.get(&height) == Some(link) {
            return Ok(true);
        }
        seen.insert(height, link.clone());
        Ok(false)
    }

    /// The de-duplication height for `link`: the layer of the first key
    /// found after descending through any empty intermediates below it. A
    /// link always maps to the same height no matter which intermediate
    /// chain it was reached through.
    async fn link_height(&self, link: &Link<K, V>) -> Result<u8, MadronaTreeError> {
        let mut current = link.clone();
        loop {
            let node = self.load(&current).await?;
            if node.links.len() == 1 {
                match &node.links[0] {
                    Link::Absent => return Ok(0),
                    next => current = next.clone(),
                }
            } else {
                return Ok(node.keys[0].layer(self.branch_factor));
            }
        }
    }
}
