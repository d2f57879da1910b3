use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use crate::{MadronaStoreError, StoreBackend};

/// A [`StoreBackend`] that keeps each blob in a file named after its content
/// hash inside a root directory.
///
/// Content hashes are base64url, so names are filesystem-safe as-is.
#[derive(Clone, Debug)]
pub struct FileStore {
    root_dir: PathBuf,
}

impl FileStore {
    /// Creates the root directory if necessary and returns a store over it.
    pub async fn new<P>(root_dir: P) -> Result<Self, MadronaStoreError>
    where
        P: AsRef<Path>,
    {
        let root_dir = root_dir.as_ref().to_owned();
        tokio::fs::create_dir_all(&root_dir)
            .await
            .map_err(|error| MadronaStoreError::Backend(format!("{error}")))?;
        Ok(Self { root_dir })
    }
}

#[async_trait]
impl StoreBackend for FileStore {
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), MadronaStoreError> {
        let path = self.root_dir.join(name);
        // Content names are immutable: an existing file already holds these
        // exact bytes.
        match tokio::fs::try_exists(&path).await {
            Ok(true) => {
                trace!(name, "blob already present");
                return Ok(());
            }
            Ok(false) => {}
            Err(error) => return Err(MadronaStoreError::Backend(format!("{error}"))),
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|error| MadronaStoreError::Backend(format!("{error}")))
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, MadronaStoreError> {
        let path = self.root_dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(MadronaStoreError::NotFound(name.to_owned()))
            }
            Err(error) => Err(MadronaStoreError::Backend(format!("{error}"))),
        }
    }

    fn prefix(&self) -> String {
        format!("file-{}", self.root_dir.display())
    }
}
