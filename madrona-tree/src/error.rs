use madrona_store::MadronaStoreError;
use thiserror::Error;

/// The error type user-supplied iteration and diff callbacks may fail with.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The common error type used by this crate.
#[derive(Error, Debug)]
pub enum MadronaTreeError {
    /// A lookup or delete targeted an entry that is not in the tree
    #[error("Entry not present in tree: {0}")]
    NotPresent(String),

    /// There was a problem when accessing the blob store
    #[error("Store error: {0}")]
    Store(#[from] MadronaStoreError),

    /// Persisted node bytes could not be decoded
    #[error("Failed to decode node: {0}")]
    Decode(String),

    /// The caller supplied key functions that disagree with the persisted tree
    #[error("Inconsistent {0}; ensure using the same key functions as the source tree")]
    Contract(&'static str),

    /// The tree was configured with invalid parameters
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A user-supplied iteration or diff callback failed
    #[error("Callback error: {0}")]
    Callback(CallbackError),
}
