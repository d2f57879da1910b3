#![warn(missing_docs)]

//! This crate provides an immutable, versioned, diffable ordered map
//! implemented as a Merkle Search Tree over a content-addressed blob store.
//!
//! Every key has a deterministic ideal level in the tree, so a set of entries
//! always produces exactly the same node structure no matter what order it
//! was built in. Nodes are named by the hash of their encoding and shared
//! structurally between versions: cloning a tree is cheap, and two versions
//! can be compared by walking only the subtrees whose links differ.
//!
//! In order to use it, construct a [`Tree`] over a
//! [`madrona_store::StoreBackend`] (or start entirely in memory), mutate it,
//! and capture versions with [`Tree::make_root`]:
//!
//! ```rust
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use madrona_tree::Tree;
//!
//! let mut tree = Tree::<u64, String, _, _>::in_memory();
//!
//! tree.insert(7, "seven".to_string()).await?;
//! assert_eq!(tree.get(&7).await?, Some("seven".to_string()));
//!
//! // Persist all dirty nodes and obtain a reattachable descriptor.
//! let root = tree.make_root().await?;
//! println!("{:?}", root.link);
//! # Ok(())
//! # }
//! ```
//!
//! A tree value accepts one operation at a time; to work with a version
//! concurrently (or to keep it around while the original evolves), [`Clone`]
//! it - clones share all current nodes copy-on-write.

use std::{future::Future, pin::Pin};

mod cache;
pub use cache::*;

mod codec;
pub use codec::NodeFormat;

mod cursor;
pub use cursor::*;

mod diff;
pub use diff::*;

mod error;
pub use error::*;

mod flush;

mod key;
pub use key::*;

mod node;
pub use node::{Link, Node};
pub(crate) use node::Snapshot;

mod path;

mod root;
pub use root::*;

mod tree;
pub use tree::*;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
