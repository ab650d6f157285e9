//! Last propagated record value per composite key.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod rocks;

pub use memory::MemoryStateStore;
pub use rocks::RocksDbStateStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open state store at {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("state store read failed for {key}: {reason}")]
    Read { key: String, reason: String },
    #[error("state store write failed for {key}: {reason}")]
    Write { key: String, reason: String },
}

/// Keyed storage for state entries. Entries are overwritten, never deleted.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
