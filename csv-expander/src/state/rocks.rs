use std::path::Path;

use async_trait::async_trait;
use rocksdb::{Options, DB};
use tracing::info;

use super::{StateStore, StoreError};

/// Embedded durable state, one RocksDB database per process.
pub struct RocksDbStateStore {
    db: DB,
}

impl RocksDbStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut options = Options::default();
        options.create_if_missing(true);

        let db = DB::open(&options, path).map_err(|e| StoreError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("Opened state store at {}", path.display());

        Ok(Self { db })
    }
}

#[async_trait]
impl StateStore for RocksDbStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let read_error = |reason: String| StoreError::Read {
            key: key.to_string(),
            reason,
        };
        let Some(bytes) = self.db.get(key).map_err(|e| read_error(e.to_string()))? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| read_error(format!("stored value is not valid UTF-8: {e}")))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.put(key, value).map_err(|e| StoreError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
