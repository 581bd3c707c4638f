//! Known-tunneler bookkeeping for FIND_TUNNEL gossip.
//!
//! The broker keeps a bounded FIFO set of peers advertising tunnel
//! availability. Relay fan-out is breadth 3 per hop with depth bounded
//! by the `relayers` accumulator carried in the query (see the
//! FIND_TUNNEL handler).

use crate::{FIND_TUNNEL_BREADTH, MAX_TUNNELERS};
use silo_types::{Contact, NodeId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Capacity of the known-tunneler set.
    pub max_tunnelers: usize,
    /// Neighbors queried per relay hop.
    pub relay_breadth: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            max_tunnelers: MAX_TUNNELERS,
            relay_breadth: FIND_TUNNEL_BREADTH,
        }
    }
}

/// Bounded set of peers advertising tunnel availability.
#[derive(Clone)]
pub struct TunnelBroker {
    config: TunnelConfig,
    tunnelers: Arc<RwLock<VecDeque<Contact>>>,
}

impl TunnelBroker {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            tunnelers: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn relay_breadth(&self) -> usize {
        self.config.relay_breadth
    }

    pub fn capacity(&self) -> usize {
        self.config.max_tunnelers
    }

    /// Record a tunneler. Duplicates by node id are ignored; the oldest
    /// entry is evicted once the set is full. Returns whether the
    /// contact was added.
    pub async fn add(&self, contact: Contact) -> bool {
        let mut tunnelers = self.tunnelers.write().await;
        if tunnelers.iter().any(|t| t.node_id == contact.node_id) {
            return false;
        }
        if tunnelers.len() >= self.config.max_tunnelers {
            tunnelers.pop_front();
        }
        debug!(tunneler = %contact.node_id, "Tunneler recorded");
        tunnelers.push_back(contact);
        true
    }

    pub async fn remove(&self, node_id: &NodeId) {
        self.tunnelers
            .write()
            .await
            .retain(|t| t.node_id != *node_id);
    }

    pub async fn list(&self) -> Vec<Contact> {
        self.tunnelers.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tunnelers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tunnelers.read().await.is_empty()
    }
}

impl Default for TunnelBroker {
    fn default() -> Self {
        Self::new(TunnelConfig::default())
    }
}
