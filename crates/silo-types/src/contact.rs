use crate::id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressable peer reference as produced by the transport layer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub node_id: NodeId,
    pub address: String,
    pub port: u16,
    pub protocol: String,
}

impl Contact {
    pub fn new(node_id: NodeId, address: impl Into<String>, port: u16) -> Self {
        Self {
            node_id,
            address: address.into(),
            port,
            protocol: "tcp".to_string(),
        }
    }

    /// `host:port` form used in log lines and dial strings.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Contact({:?}@{})", self.node_id, self.endpoint())
    }
}
