//! Storage contract protocol core.
//!
//! The message-driven state machine that negotiates storage contracts,
//! validates signatures and timing, authorizes data-channel transfers,
//! proves shard custody through challenge-response audits, and arranges
//! NAT traversal through tunnel gateways.

pub mod audit;
pub mod channel;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod negotiator;
pub mod net;
pub mod pending;
pub mod testing;
pub mod triggers;
pub mod tunnel;

pub use audit::{AuditProof, ShardProver};
pub use channel::{ChannelAuthorizer, ChannelConfig};
pub use error::{ProtocolError, Result};
pub use handlers::{Protocol, ProtocolConfig, ProtocolEvent};
pub use messages::{RpcCall, RpcReply, RpcResponse};
pub use negotiator::{FarmerNegotiator, NegotiatorConfig};
pub use net::{DataChannelClient, Gateway, RoutingTable, Transport, TunnelServer};
pub use pending::PendingOfferRegistry;
pub use triggers::{TriggerHandler, TriggerRegistry};
pub use tunnel::{TunnelBroker, TunnelConfig};

/// Widest window before `store_begin` during which a consignment is
/// accepted, in milliseconds (24 hours).
pub const CONSIGN_THRESHOLD_MS: i64 = 86_400_000;

/// Per-request bound on concurrently generated audit proofs.
pub const MAX_CONCURRENT_AUDITS: usize = 3;

/// Relay depth bound for FIND_TUNNEL gossip.
pub const MAX_FIND_TUNNEL_RELAYS: usize = 2;

/// Neighbors queried per FIND_TUNNEL relay hop.
pub const FIND_TUNNEL_BREADTH: usize = 3;

/// Capacity of the known-tunneler set.
pub const MAX_TUNNELERS: usize = 20;

/// Data-channel token lifetime in seconds.
pub const CHANNEL_TOKEN_TTL_SECS: u64 = 600;

/// Data-channel token entropy in bytes (256 bits).
pub const TOKEN_BYTES: usize = 32;
