//! Shard handles and the in-memory shard store.
//!
//! A shard handle is a tagged variant rather than a duck-typed stream:
//! [`Shard::Empty`] carries a writable sink for a shard that has not been
//! received yet, [`Shard::Present`] carries a readable source once the
//! bytes are stored. The block-oriented on-disk layout lives behind the
//! store and is out of scope here.

use crate::backend::{Result, StorageError};
use silo_types::DataHash;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tracing::debug;

enum ShardState {
    /// Partially received bytes, not yet committed.
    Pending(Vec<u8>),
    /// Fully received, content-addressed bytes.
    Stored(Arc<Vec<u8>>),
}

/// Content-addressed shard storage.
#[derive(Clone, Default)]
pub struct ShardStore {
    shards: Arc<RwLock<HashMap<DataHash, ShardState>>>,
}

impl ShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a handle for `hash`: readable if the shard is stored,
    /// writable otherwise.
    pub async fn open(&self, hash: DataHash) -> Shard {
        let shards = self.shards.read().await;
        match shards.get(&hash) {
            Some(ShardState::Stored(_)) => Shard::Present(ShardSource {
                hash,
                store: self.clone(),
            }),
            _ => Shard::Empty(ShardSink {
                hash,
                store: self.clone(),
            }),
        }
    }

    /// Drop a shard and any partial write state.
    pub async fn destroy(&self, hash: &DataHash) {
        self.shards.write().await.remove(hash);
    }

    /// Total bytes held by committed shards.
    pub async fn used_space(&self) -> u64 {
        self.shards
            .read()
            .await
            .values()
            .map(|state| match state {
                ShardState::Stored(bytes) => bytes.len() as u64,
                ShardState::Pending(_) => 0,
            })
            .sum()
    }
}

/// Handle to a shard slot, tagged by whether the bytes are present.
pub enum Shard {
    Empty(ShardSink),
    Present(ShardSource),
}

impl Shard {
    pub fn hash(&self) -> DataHash {
        match self {
            Shard::Empty(sink) => sink.hash,
            Shard::Present(source) => source.hash,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Shard::Present(_))
    }
}

/// Writable handle for a shard that has not been received yet.
pub struct ShardSink {
    hash: DataHash,
    store: ShardStore,
}

impl ShardSink {
    pub fn hash(&self) -> DataHash {
        self.hash
    }

    /// Append a chunk of incoming shard bytes.
    pub async fn write(&self, chunk: &[u8]) -> Result<()> {
        let mut shards = self.store.shards.write().await;
        match shards
            .entry(self.hash)
            .or_insert_with(|| ShardState::Pending(Vec::new()))
        {
            ShardState::Pending(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            ShardState::Stored(_) => Err(StorageError::Backend(format!(
                "shard {} is already stored",
                self.hash
            ))),
        }
    }

    /// Seal the shard. The content must hash to the slot's data hash.
    pub async fn commit(self) -> Result<ShardSource> {
        let mut shards = self.store.shards.write().await;
        let bytes = match shards.remove(&self.hash) {
            Some(ShardState::Pending(buf)) => buf,
            Some(stored @ ShardState::Stored(_)) => {
                shards.insert(self.hash, stored);
                return Err(StorageError::Backend(format!(
                    "shard {} is already stored",
                    self.hash
                )));
            }
            None => Vec::new(),
        };

        let actual = DataHash::of(&bytes);
        if actual != self.hash {
            return Err(StorageError::ShardHashMismatch {
                expected: self.hash,
                actual,
            });
        }

        debug!(hash = %self.hash, size = bytes.len(), "Shard committed");
        shards.insert(self.hash, ShardState::Stored(Arc::new(bytes)));
        Ok(ShardSource {
            hash: self.hash,
            store: self.store.clone(),
        })
    }

    /// Abandon the slot and discard any partial bytes.
    pub async fn destroy(self) {
        self.store.destroy(&self.hash).await;
    }
}

/// Readable handle for a stored shard.
pub struct ShardSource {
    hash: DataHash,
    store: ShardStore,
}

impl ShardSource {
    pub fn hash(&self) -> DataHash {
        self.hash
    }

    pub async fn size(&self) -> Result<u64> {
        let shards = self.store.shards.read().await;
        match shards.get(&self.hash) {
            Some(ShardState::Stored(bytes)) => Ok(bytes.len() as u64),
            _ => Err(StorageError::ShardNotFound(self.hash)),
        }
    }

    /// Single-pass async reader over the shard bytes.
    pub async fn open_reader(&self) -> Result<impl AsyncRead + Send + Unpin> {
        let shards = self.store.shards.read().await;
        match shards.get(&self.hash) {
            Some(ShardState::Stored(bytes)) => Ok(Cursor::new(ArcBytes(Arc::clone(bytes)))),
            _ => Err(StorageError::ShardNotFound(self.hash)),
        }
    }
}

/// Shared shard bytes viewed as a contiguous slice for cursor reads.
struct ArcBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
