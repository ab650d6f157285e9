//! Byte-stream providers for the objects named by path messages.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::source_ref::SourceReference;

pub mod folder;
pub mod s3;

pub use folder::FolderObjectStore;
pub use s3::S3ObjectStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage operation failed: {0}")]
    OperationFailed(String),
    #[error("fetch did not complete within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the full content of an object.
    async fn fetch(&self, source: &SourceReference) -> Result<Bytes, StorageError>;
}
