use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use silo_types::{Contract, DataHash, NodeId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    NotFound(DataHash),

    #[error("Shard not found: {0}")]
    ShardNotFound(DataHash),

    #[error("Shard content does not match its hash: expected {expected}, got {actual}")]
    ShardHashMismatch {
        expected: DataHash,
        actual: DataHash,
    },

    #[error("Contract hash {contract} does not match item hash {item}")]
    HashMismatch { contract: DataHash, item: DataHash },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persisted form of a storage item: everything except the live shard
/// handle, which is reattached from the shard store on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub hash: DataHash,
    pub contracts: HashMap<NodeId, Contract>,
    pub trees: HashMap<NodeId, Vec<String>>,
    pub challenges: HashMap<NodeId, Vec<String>>,
}

impl ItemRecord {
    /// Bytes this item claims against node capacity: the largest
    /// contracted shard size.
    pub fn reserved_size(&self) -> u64 {
        self.contracts
            .values()
            .map(|c| c.data_size)
            .max()
            .unwrap_or(0)
    }
}

/// Trait for item persistence backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch a record by data hash.
    async fn get(&self, hash: &DataHash) -> Result<Option<ItemRecord>>;

    /// Insert or replace a record.
    async fn put(&self, hash: &DataHash, record: &ItemRecord) -> Result<()>;

    /// Delete a record.
    async fn del(&self, hash: &DataHash) -> Result<()>;

    /// All stored data hashes.
    async fn keys(&self) -> Result<Vec<DataHash>>;

    /// Total bytes reserved by stored records.
    async fn used_space(&self) -> Result<u64>;
}
