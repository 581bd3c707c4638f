//! Wire message bodies for the nine protocol methods.
//!
//! Requests and replies are JSON-RPC-like: every request carries the
//! sender's contact, method-specific params, and replies either a typed
//! result body or an error reason string.

use crate::audit::AuditProof;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use silo_types::{Contact, DataHash};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum RpcCall {
    #[serde(rename = "OFFER")]
    Offer(OfferParams),
    #[serde(rename = "CONSIGN")]
    Consign(ConsignParams),
    #[serde(rename = "MIRROR")]
    Mirror(MirrorParams),
    #[serde(rename = "RETRIEVE")]
    Retrieve(RetrieveParams),
    #[serde(rename = "AUDIT")]
    Audit(AuditParams),
    #[serde(rename = "PROBE")]
    Probe(ProbeParams),
    #[serde(rename = "FIND_TUNNEL")]
    FindTunnel(FindTunnelParams),
    #[serde(rename = "OPEN_TUNNEL")]
    OpenTunnel(OpenTunnelParams),
    #[serde(rename = "TRIGGER")]
    Trigger(TriggerParams),
}

impl RpcCall {
    pub fn method(&self) -> &'static str {
        match self {
            RpcCall::Offer(_) => "OFFER",
            RpcCall::Consign(_) => "CONSIGN",
            RpcCall::Mirror(_) => "MIRROR",
            RpcCall::Retrieve(_) => "RETRIEVE",
            RpcCall::Audit(_) => "AUDIT",
            RpcCall::Probe(_) => "PROBE",
            RpcCall::FindTunnel(_) => "FIND_TUNNEL",
            RpcCall::OpenTunnel(_) => "OPEN_TUNNEL",
            RpcCall::Trigger(_) => "TRIGGER",
        }
    }
}

/// Contract arrives as raw JSON: parse failures must map to
/// `invalid-format` rather than a transport decode error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferParams {
    pub contract: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignParams {
    pub data_hash: DataHash,
    /// Bottom leaves of the renter's audit tree, hex hash160 strings.
    pub audit_tree: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorParams {
    pub data_hash: DataHash,
    pub token: String,
    /// Source farmer to stream the shard from.
    pub farmer: Contact,
}

/// The key is kept as a string so a malformed hash can be rejected with
/// `invalid-key` instead of failing to decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveParams {
    pub data_hash: String,
}

/// Audits arrive as raw JSON: a non-array payload must map to
/// `invalid-audits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditParams {
    pub audits: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    pub data_hash: DataHash,
    /// Hex challenge string issued by the renter.
    pub challenge: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindTunnelParams {
    /// Nodes that have already relayed this query.
    #[serde(default)]
    pub relayers: Vec<Contact>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenTunnelParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerParams(pub Value);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcReply {
    Offer(OfferReply),
    Consign(ConsignReply),
    Mirror(EmptyReply),
    Retrieve(RetrieveReply),
    Audit(AuditReply),
    Probe(EmptyReply),
    FindTunnel(FindTunnelReply),
    OpenTunnel(OpenTunnelReply),
    Trigger(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferReply {
    /// Canonical form of the completed contract; absent when the renter
    /// declines to sign.
    pub contract: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsignReply {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyReply {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveReply {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReply {
    pub proofs: Vec<AuditProof>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindTunnelReply {
    pub tunnels: Vec<Contact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelAlias {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTunnelReply {
    /// WebSocket entrance URL: `ws://<host>:<port>/tun?token=<token>`.
    pub tunnel: String,
    pub alias: TunnelAlias,
}

/// Wire envelope for a handler outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RpcReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub reason: String,
    pub message: String,
}

impl RpcResponse {
    pub fn from_result(outcome: std::result::Result<RpcReply, ProtocolError>) -> Self {
        match outcome {
            Ok(reply) => Self {
                result: Some(reply),
                error: None,
            },
            Err(e) => Self {
                result: None,
                error: Some(RpcError {
                    reason: e.reason().to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}
