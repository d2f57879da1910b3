use thiserror::Error;

/// The common error type used by this crate.
#[derive(Error, Debug)]
pub enum MadronaStoreError {
    /// A key or value could not be marshaled into bytes
    #[error("Failed to marshal: {0}")]
    MarshalFailed(String),

    /// Bytes could not be unmarshaled into a key or value
    #[error("Failed to unmarshal: {0}")]
    UnmarshalFailed(String),

    /// There was a problem when working with a storage backend
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A blob was requested that the backend does not hold
    #[error("Blob not found in store: {0}")]
    NotFound(String),
}
