use std::sync::Arc;

use madrona_store::{Marshaler, StoreBackend};
use serde::{Deserialize, Serialize};

use crate::{Link, MadronaTreeError, NodeFormat, Tree, TreeConfig, TreeKey, TreeValue};

/// Identifies a version of a tree whose nodes are accessible in a persistent
/// store.
///
/// The root document is persisted by the caller, not by this library; it is
/// everything needed to reattach the tree later with [`Root::load`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Root {
    /// Content hash of the root node; `None` for an empty tree.
    pub link: Option<String>,
    /// Number of entries.
    pub size: u64,
    /// Levels between the leaves and the root.
    pub height: u8,
    /// Target entries per node.
    pub branch_factor: u32,
    /// Wire format of the tree's nodes. Roots written before formats were
    /// tagged decode as the legacy wrapper format.
    #[serde(default = "NodeFormat::legacy")]
    pub node_format: NodeFormat,
}

impl Root {
    /// An empty tree that will persist with the given options.
    pub fn new(options: crate::TreeOptions) -> Self {
        Root {
            link: None,
            size: 0,
            height: 0,
            branch_factor: options.branch_factor,
            node_format: options.node_format,
        }
    }

    /// Attaches this root to a store. The root node is loaded and verified
    /// up front; everything below it loads on demand.
    pub async fn load<K, V, M, S>(
        &self,
        config: TreeConfig<K, V, M, S>,
    ) -> Result<Tree<K, V, M, S>, MadronaTreeError>
    where
        K: TreeKey,
        V: TreeValue,
        M: Marshaler,
        S: StoreBackend,
    {
        let mut shrink_below_size = 1u64;
        for _ in 0..self.height {
            shrink_below_size *= u64::from(self.branch_factor);
        }
        let tree = Tree {
            root: self.link.clone().map(Link::Persisted),
            branch_factor: self.branch_factor,
            height: self.height,
            size: self.size,
            grow_after_size: shrink_below_size * u64::from(self.branch_factor),
            shrink_below_size,
            marshaler: config.marshaler,
            store: Arc::new(config.store),
            cache: config.cache,
            format: self.node_format,
        };
        tree.check_root().await?;
        Ok(tree)
    }
}

impl<K, V, M, S> Tree<K, V, M, S>
where
    K: TreeKey,
    V: TreeValue,
    M: Marshaler,
    S: StoreBackend,
{
    /// Makes a new persistent root, after ensuring all the changed nodes have
    /// been written to the store.
    pub async fn make_root(&mut self) -> Result<Root, MadronaTreeError> {
        let link = self.flush().await?;
        Ok(Root {
            link,
            size: self.size,
            height: self.height,
            branch_factor: self.branch_factor,
            node_format: self.format,
        })
    }

    /// Verifies that the root node agrees with this tree's key functions:
    /// keys strictly ascending and every key's layer at or above the tree
    /// height.
    async fn check_root(&self) -> Result<(), MadronaTreeError> {
        let Some(node) = self.root_node().await? else {
            return Ok(());
        };
        for pair in node.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(MadronaTreeError::Contract("key order"));
            }
        }
        for key in &node.keys {
            if key.layer(self.branch_factor) < self.height {
                return Err(MadronaTreeError::Contract("key layers"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_round_trip_through_json() {
        let root = Root {
            link: Some("abc".into()),
            size: 17,
            height: 1,
            branch_factor: 16,
            node_format: NodeFormat::Binary,
        };
        let bytes = serde_json::to_string(&root).unwrap();
        let decoded: Root = serde_json::from_str(&bytes).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn untagged_roots_decode_as_the_wrapper_format() {
        let decoded: Root =
            serde_json::from_str(r#"{"link":null,"size":0,"height":0,"branch_factor":16}"#)
                .unwrap();
        assert_eq!(decoded.node_format, NodeFormat::Wrapper);

        let decoded: Root = serde_json::from_str(
            r#"{"link":null,"size":0,"height":0,"branch_factor":16,"node_format":""}"#,
        )
        .unwrap();
        assert_eq!(decoded.node_format, NodeFormat::Wrapper);
    }
}
