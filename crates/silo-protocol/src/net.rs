//! Interfaces consumed from external collaborators.
//!
//! The DHT routing table, the RPC transport, the tunnel gateway server,
//! and the streaming data-channel client all live outside the protocol
//! core; the core drives them through these traits. In-memory doubles
//! for tests live in [`crate::testing`].

use crate::error::Result;
use crate::messages::{RpcCall, RpcReply};
use async_trait::async_trait;
use silo_types::{Contact, DataHash, NodeId};
use tokio::io::AsyncRead;

/// Kademlia routing table surface used by the core.
#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Locally known contact for a node id.
    async fn get_contact(&self, node_id: &NodeId) -> Option<Contact>;

    /// Iterative FIND_NODE lookup through the overlay.
    async fn find_node(&self, node_id: &NodeId) -> Result<Vec<Contact>>;

    /// Up to `limit` nearest known contacts to `target`, excluding the
    /// given node ids.
    async fn nearest(&self, target: &NodeId, limit: usize, exclude: &[NodeId]) -> Vec<Contact>;
}

/// RPC transport over the overlay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and await the peer's reply.
    async fn send(&self, contact: &Contact, call: RpcCall) -> Result<RpcReply>;

    /// Liveness probe.
    async fn ping(&self, contact: &Contact) -> Result<()>;

    /// Whether this node sits behind NAT and needs traversal help.
    fn requires_traversal(&self) -> bool;

    /// Map an external port to this node through the NAT device.
    async fn create_port_mapping(&self, port: u16) -> Result<()>;
}

/// Gateway allocated by the tunnel server for a NATed peer.
#[derive(Debug, Clone)]
pub struct Gateway {
    /// One-time token admitting the peer at the tunnel entrance.
    pub entrance_token: String,
    /// Port the gateway accepts entrance connections on.
    pub entrance_port: u16,
}

/// Local tunnel gateway server.
#[async_trait]
pub trait TunnelServer: Send + Sync {
    /// Whether this node can currently take on another tunneled peer.
    fn has_tunnel_available(&self) -> bool;

    /// Allocate a gateway for a requesting peer.
    async fn create_gateway(&self) -> Result<Gateway>;

    /// Port the tunnel WebSocket endpoint listens on.
    fn listen_port(&self) -> u16;
}

/// Client side of the authorized data channel.
#[async_trait]
pub trait DataChannelClient: Send + Sync {
    /// Open a token-authorized read stream for `hash` from a remote
    /// farmer.
    async fn open_read_stream(
        &self,
        farmer: &Contact,
        token: &str,
        hash: &DataHash,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}
