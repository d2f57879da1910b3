use madrona_store::{Marshaler, StoreBackend};

use crate::{
    Link, MadronaTreeError, Tree, TreeKey, TreeValue,
    path::PathEntry,
};

/// Seeks around a tree.
///
/// A cursor holds its own cloned tree handle, so traversal is unaffected by
/// later mutation of the source tree. It starts positioned at the root's
/// first slot; use [`Cursor::min`], [`Cursor::max`] or [`Cursor::ceil`] to
/// land on an entry.
pub struct Cursor<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    tree: Tree<K, V, M, S>,
    path: Vec<PathEntry<K, V>>,
}

impl<K, V, M, S> Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Obtains a cursor over a point-in-time clone of this tree.
    pub async fn cursor(&self) -> Result<Cursor<K, V, M, S>, MadronaTreeError> {
        let tree = self.clone();
        let path = match tree.root_node().await? {
            Some(node) => vec![PathEntry {
                node,
                link_index: 0,
            }],
            None => vec![],
        };
        Ok(Cursor { tree, path })
    }
}

impl<K, V, M, S> Cursor<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// The key and value of the entry at the cursor, or `None` if the cursor
    /// does not rest on an entry.
    pub fn get(&self) -> Option<(&K, &V)> {
        let entry = self.path.last()?;
        if entry.link_index >= entry.node.keys.len() {
            return None;
        }
        Some((
            &entry.node.keys[entry.link_index],
            &entry.node.values[entry.link_index],
        ))
    }

    /// Moves to the smallest key in the subtree under the current position.
    pub async fn min(&mut self) -> Result<(), MadronaTreeError> {
        let Some(entry) = self.path.last() else {
            return Ok(());
        };
        let mut node = entry.node.clone();
        loop {
            if node.links.is_empty() || node.links[0].is_absent() {
                return Ok(());
            }
            let child = self.tree.load(&node.links[0]).await?;
            node = child.clone();
            self.path.push(PathEntry {
                node: child,
                link_index: 0,
            });
        }
    }

    /// Moves to the largest key in the subtree under the current position.
    pub async fn max(&mut self) -> Result<(), MadronaTreeError> {
        let Some(entry) = self.path.pop() else {
            return Ok(());
        };
        let mut node = entry.node;
        loop {
            let last_link = node.links.len().saturating_sub(1);
            if node.links.is_empty() || node.links[last_link].is_absent() {
                let link_index = node.keys.len().saturating_sub(1);
                self.path.push(PathEntry { node, link_index });
                return Ok(());
            }
            self.path.push(PathEntry {
                node: node.clone(),
                link_index: last_link,
            });
            let child = self.tree.load(&node.links[last_link]).await?;
            node = child;
        }
    }

    /// Moves to the entry with the next-larger key.
    pub async fn forward(&mut self) -> Result<(), MadronaTreeError> {
        let (next_link, has_next_key) = match self.path.last() {
            None => return Ok(()),
            Some(entry) => {
                let next_index = entry.link_index + 1;
                let next_link = if next_index < entry.node.links.len()
                    && !entry.node.links[next_index].is_absent()
                {
                    Some(entry.node.links[next_index].clone())
                } else {
                    None
                };
                (next_link, next_index < entry.node.keys.len())
            }
        };

        if let Some(link) = next_link {
            let child = self.tree.load(&link).await?;
            if let Some(entry) = self.path.last_mut() {
                entry.link_index += 1;
            }
            self.path.push(PathEntry {
                node: child,
                link_index: 0,
            });
            return self.min().await;
        }
        if has_next_key {
            if let Some(entry) = self.path.last_mut() {
                entry.link_index += 1;
            }
            return Ok(());
        }
        // This node is exhausted; climb until an ancestor still has an entry
        // at its slot.
        loop {
            self.path.pop();
            match self.path.last() {
                None => return Ok(()),
                Some(entry) if entry.link_index < entry.node.keys.len() => return Ok(()),
                Some(_) => {}
            }
        }
    }

    /// Moves to the entry with the next-smaller key.
    pub async fn backward(&mut self) -> Result<(), MadronaTreeError> {
        let left_link = match self.path.last() {
            None => return Ok(()),
            Some(entry) => match &entry.node.links[entry.link_index] {
                Link::Absent => None,
                link => Some(link.clone()),
            },
        };

        if let Some(link) = left_link {
            let child = self.tree.load(&link).await?;
            self.path.push(PathEntry {
                node: child,
                link_index: 0,
            });
            return self.max().await;
        }
        if let Some(entry) = self.path.last_mut() {
            if entry.link_index > 0 {
                entry.link_index -= 1;
                return Ok(());
            }
        }
        loop {
            self.path.pop();
            match self.path.last_mut() {
                None => return Ok(()),
                Some(entry) if entry.link_index > 0 => {
                    entry.link_index -= 1;
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    /// Moves to the entry with the given key, or if it is not present, the
    /// entry with the next-larger key.
    pub async fn ceil(&mut self, key: &K) -> Result<(), MadronaTreeError> {
        loop {
            let descend_link = {
                let Some(entry) = self.path.last_mut() else {
                    return Ok(());
                };
                let (index, exact) = entry.node.search(key);
                entry.link_index = index;
                if exact {
                    return Ok(());
                }
                match &entry.node.links[index] {
                    Link::Absent => None,
                    link => Some(link.clone()),
                }
            };
            match descend_link {
                Some(link) => {
                    let child = self.tree.load(&link).await?;
                    self.path.push(PathEntry {
                        node: child,
                        link_index: 0,
                    });
                }
                None => {
                    // Exhausted the left subtree; climb to the ceiling.
                    while let Some(entry) = self.path.last() {
                        if entry.link_index < entry.node.keys.len() {
                            return Ok(());
                        }
                        self.path.pop();
                    }
                    return Ok(());
                }
            }
        }
    }
}
