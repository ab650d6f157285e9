use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, StorageError};
use crate::source_ref::SourceReference;

/// Serves objects from `<root>/<container>/<path>` on local disk.
#[derive(Debug, Clone)]
pub struct FolderObjectStore {
    root: PathBuf,
}

impl FolderObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, source: &SourceReference) -> Result<PathBuf, StorageError> {
        let relative = PathBuf::from(source.container()).join(source.path());
        // Keep lookups inside the root.
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(StorageError::NotFound(source.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FolderObjectStore {
    async fn fetch(&self, source: &SourceReference) -> Result<Bytes, StorageError> {
        let path = self.resolve(source)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(source.to_string()))
            }
            Err(e) => Err(StorageError::OperationFailed(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }
}
