use async_trait::async_trait;

use crate::MadronaStoreError;

mod fs;
pub use fs::*;

mod memory;
pub use memory::*;

/// A [`StoreBackend`] holds immutable blobs addressed by name, where the name
/// is always derived from the content (see [`crate::content_hash`]).
///
/// Because names are content-derived, `store` is idempotent: writing the same
/// name twice always carries the same bytes, and backends are free to skip
/// the second write. Implementations must be safe for concurrent use.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Make `bytes` retrievable under `name`.
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), MadronaStoreError>;

    /// Retrieve the previously stored bytes for `name`.
    async fn load(&self, name: &str) -> Result<Vec<u8>, MadronaStoreError>;

    /// An opaque tag identifying the container behind this backend, used to
    /// partition caches that are shared across multiple backends.
    fn prefix(&self) -> String;
}
