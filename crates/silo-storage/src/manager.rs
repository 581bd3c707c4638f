//! Persistence façade over the item backend and shard store.
//!
//! The manager is the single owner of [`StorageItem`]s: handlers load a
//! temporary item, mutate it, and write it back through [`save`], which
//! is all-or-nothing against the backend. Capacity crossings are
//! announced as [`StorageEvent`]s on a broadcast channel so subscribers
//! (the farmer negotiator) can gate new offers.
//!
//! [`save`]: StorageManager::save

use crate::backend::{Result, StorageBackend, StorageError};
use crate::item::StorageItem;
use crate::shard::ShardStore;
use silo_types::DataHash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 64;

/// Capacity and sizing knobs for a node's storage.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Total bytes this node offers to the network.
    pub capacity_bytes: u64,
    /// Largest single shard accepted by contract admission.
    pub max_shard_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 8 * 1024 * 1024 * 1024, // 8 GiB
            max_shard_size: 256 * 1024 * 1024,      // 256 MiB
        }
    }
}

/// Capacity lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// Used space reached capacity; stop taking new contracts.
    Locked,
    /// Used space dropped back below capacity.
    Unlocked,
    /// A backend operation failed.
    Error(String),
}

pub struct StorageManager {
    backend: Arc<dyn StorageBackend>,
    shards: ShardStore,
    config: StorageConfig,
    locked: AtomicBool,
    events: broadcast::Sender<StorageEvent>,
}

impl StorageManager {
    pub fn new(backend: Arc<dyn StorageBackend>, shards: ShardStore, config: StorageConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            backend,
            shards,
            config,
            locked: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    pub fn shards(&self) -> &ShardStore {
        &self.shards
    }

    /// Load an item and reattach its shard handle.
    pub async fn load(&self, hash: &DataHash) -> Result<StorageItem> {
        let record = self
            .backend
            .get(hash)
            .await
            .map_err(|e| self.surface(e))?
            .ok_or(StorageError::NotFound(*hash))?;
        let shard = self.shards.open(*hash).await;
        Ok(StorageItem::from_record(record, shard))
    }

    pub async fn exists(&self, hash: &DataHash) -> Result<bool> {
        Ok(self.backend.get(hash).await.map_err(|e| self.surface(e))?.is_some())
    }

    /// Persist an item record and re-evaluate capacity.
    pub async fn save(&self, item: &StorageItem) -> Result<()> {
        self.backend
            .put(&item.hash, &item.record())
            .await
            .map_err(|e| self.surface(e))?;
        debug!(hash = %item.hash, contracts = item.contracts.len(), "Item saved");
        self.check_capacity().await;
        Ok(())
    }

    /// Drop an item record and its shard.
    pub async fn del(&self, hash: &DataHash) -> Result<()> {
        self.backend.del(hash).await.map_err(|e| self.surface(e))?;
        self.shards.destroy(hash).await;
        self.check_capacity().await;
        Ok(())
    }

    /// Bytes reserved by stored records.
    pub async fn used_space(&self) -> Result<u64> {
        self.backend.used_space().await.map_err(|e| self.surface(e))
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity_bytes
    }

    pub fn max_shard_size(&self) -> u64 {
        self.config.max_shard_size
    }

    async fn check_capacity(&self) {
        let used = match self.backend.used_space().await {
            Ok(used) => used,
            Err(e) => {
                let _ = self.events.send(StorageEvent::Error(e.to_string()));
                return;
            }
        };

        let was_locked = self.locked.load(Ordering::SeqCst);
        if used >= self.config.capacity_bytes && !was_locked {
            self.locked.store(true, Ordering::SeqCst);
            warn!(used, capacity = self.config.capacity_bytes, "Storage locked");
            let _ = self.events.send(StorageEvent::Locked);
        } else if used < self.config.capacity_bytes && was_locked {
            self.locked.store(false, Ordering::SeqCst);
            debug!(used, capacity = self.config.capacity_bytes, "Storage unlocked");
            let _ = self.events.send(StorageEvent::Unlocked);
        }
    }

    fn surface(&self, error: StorageError) -> StorageError {
        let _ = self.events.send(StorageEvent::Error(error.to_string()));
        error
    }
}
