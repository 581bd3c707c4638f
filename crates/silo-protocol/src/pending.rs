//! Renter-side bookkeeping for open offer negotiations.
//!
//! One entry per data hash, process-wide: the registry is owned by the
//! protocol instance and guards the invariant that at most one
//! negotiation is open for any shard at a time. An entry holds the
//! resolver that hands the accepted contract to the consignment logic,
//! and a blacklist of farmers whose offers must be refused.

use crate::error::{ProtocolError, Result};
use silo_types::{Contact, Contract, DataHash, NodeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, RwLock};
use tracing::debug;

/// Receiver half handed to whoever opened the negotiation. Yields the
/// accepting farmer and the completed contract; dropped without a value
/// when the negotiation is cancelled.
pub type OfferReceiver = oneshot::Receiver<(Contact, Contract)>;

struct PendingOffer {
    resolver: oneshot::Sender<(Contact, Contract)>,
    blacklist: HashSet<NodeId>,
    created_at: Instant,
}

#[derive(Clone, Default)]
pub struct PendingOfferRegistry {
    entries: Arc<RwLock<HashMap<DataHash, PendingOffer>>>,
}

impl PendingOfferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a negotiation for `data_hash`. At most one may be open per
    /// hash; a second open fails while the first is outstanding.
    pub async fn open(&self, data_hash: DataHash) -> Result<OfferReceiver> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&data_hash) {
            return Err(ProtocolError::InvalidFormat(format!(
                "negotiation already open for {}",
                data_hash
            )));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            data_hash,
            PendingOffer {
                resolver: tx,
                blacklist: HashSet::new(),
                created_at: Instant::now(),
            },
        );
        debug!(hash = %data_hash, "Negotiation opened");
        Ok(rx)
    }

    pub async fn contains(&self, data_hash: &DataHash) -> bool {
        self.entries.read().await.contains_key(data_hash)
    }

    pub async fn is_blacklisted(&self, data_hash: &DataHash, node_id: &NodeId) -> bool {
        self.entries
            .read()
            .await
            .get(data_hash)
            .map(|entry| entry.blacklist.contains(node_id))
            .unwrap_or(false)
    }

    /// Refuse future offers from `node_id` for this negotiation.
    pub async fn blacklist(&self, data_hash: &DataHash, node_id: NodeId) {
        if let Some(entry) = self.entries.write().await.get_mut(data_hash) {
            entry.blacklist.insert(node_id);
        }
    }

    /// Atomically remove the entry and fire its resolver with the
    /// accepted contract. Returns false when no entry was open.
    pub async fn resolve(&self, data_hash: &DataHash, contact: Contact, contract: Contract) -> bool {
        let entry = self.entries.write().await.remove(data_hash);
        match entry {
            Some(entry) => {
                // Receiver may have been dropped; the negotiation is
                // closed either way.
                let _ = entry.resolver.send((contact, contract));
                true
            }
            None => false,
        }
    }

    /// Abandon a negotiation. The receiver observes a closed channel.
    pub async fn cancel(&self, data_hash: &DataHash) -> bool {
        let removed = self.entries.write().await.remove(data_hash).is_some();
        if removed {
            debug!(hash = %data_hash, "Negotiation cancelled");
        }
        removed
    }

    /// Drop entries older than `max_age`, returning how many were
    /// reaped. Per-request deadlines remain the transport's job.
    pub async fn reap_expired(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < max_age);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
