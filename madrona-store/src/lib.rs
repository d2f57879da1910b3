#![warn(missing_docs)]

//! This crate provides the content-addressed blob storage substrate for
//! madrona trees: a [StoreBackend] trait for persisting immutable,
//! hash-named blobs, a [Marshaler] contract for converting individual keys
//! and values to bytes, and the content-hash function that names every
//! persisted node.
//!
//! Backends only ever see opaque bytes under opaque names; everything about
//! tree structure lives upstream in `madrona-tree`.
//!
//! ```rust
//! # async fn example() -> Result<(), madrona_store::MadronaStoreError> {
//! use madrona_store::{MemoryStore, StoreBackend, content_hash};
//!
//! let store = MemoryStore::new();
//!
//! let bytes = b"some encoded node".to_vec();
//! let name = content_hash(&bytes);
//! store.store(&name, bytes.clone()).await?;
//!
//! assert_eq!(store.load(&name).await?, bytes);
//! # Ok(())
//! # }
//! ```

mod backend;
pub use backend::*;

mod error;
pub use error::*;

mod hash;
pub use hash::*;

mod marshal;
pub use marshal::*;
