use crate::backend::{ItemRecord, Result, StorageBackend};
use async_trait::async_trait;
use silo_types::DataHash;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory item backend for testing and development.
pub struct MemoryBackend {
    records: Arc<RwLock<HashMap<DataHash, ItemRecord>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, hash: &DataHash) -> Result<Option<ItemRecord>> {
        Ok(self.records.read().await.get(hash).cloned())
    }

    async fn put(&self, hash: &DataHash, record: &ItemRecord) -> Result<()> {
        self.records.write().await.insert(*hash, record.clone());
        Ok(())
    }

    async fn del(&self, hash: &DataHash) -> Result<()> {
        self.records.write().await.remove(hash);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<DataHash>> {
        Ok(self.records.read().await.keys().copied().collect())
    }

    async fn used_space(&self) -> Result<u64> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .map(|r| r.reserved_size())
            .sum())
    }
}
