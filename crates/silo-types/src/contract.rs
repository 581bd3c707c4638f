//! Storage contracts: the canonical signed document binding a renter and
//! a farmer over a specific shard for a specific period.
//!
//! A contract starts life as a renter-published shell (renter id set, no
//! farmer half), is countersigned by a farmer, completed by the renter,
//! and is immutable once both signatures are present. Signatures cover
//! the canonical JSON byte form with both signature fields nulled.

use crate::canonical::canonical_bytes;
use crate::error::{Result, TypesError};
use crate::id::{DataHash, NodeId};
use crate::keys::{KeyPair, Signature};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Contract schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContractVersion {
    #[default]
    V0,
}

impl Serialize for ContractVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(match self {
            ContractVersion::V0 => 0,
        })
    }
}

impl<'de> Deserialize<'de> for ContractVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match u32::deserialize(deserializer)? {
            0 => Ok(ContractVersion::V0),
            v => Err(serde::de::Error::custom(format!(
                "unknown contract version {}",
                v
            ))),
        }
    }
}

/// Which side of the contract a signature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractParty {
    Renter,
    Farmer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub version: ContractVersion,
    pub renter_id: Option<NodeId>,
    pub farmer_id: Option<NodeId>,
    pub renter_signature: Option<Signature>,
    pub farmer_signature: Option<Signature>,
    pub payment_source: Option<String>,
    pub payment_destination: Option<String>,
    pub payment_amount: u64,
    /// Payment interval in milliseconds.
    pub payment_interval: u64,
    pub data_hash: DataHash,
    pub data_size: u64,
    /// Storage window start, ms since epoch.
    pub store_begin: i64,
    /// Storage window end, ms since epoch.
    pub store_end: i64,
    pub audit_count: u32,
    /// Bottom leaves of the renter's audit tree, hex hash160 strings.
    pub audit_leaves: Vec<String>,
}

impl Contract {
    /// Parse a contract from its JSON wire form and validate the schema.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let contract: Contract = serde_json::from_value(value.clone())?;
        contract.validate()?;
        Ok(contract)
    }

    /// Canonical JSON wire form.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Structural validation: a contract whose storage window is inverted
    /// or whose leaves are not hash-shaped never enters negotiation.
    pub fn validate(&self) -> Result<()> {
        if self.store_begin >= self.store_end {
            return Err(TypesError::Contract(format!(
                "storage window is inverted: {} >= {}",
                self.store_begin, self.store_end
            )));
        }
        for leaf in &self.audit_leaves {
            if hex::decode(leaf).map(|b| b.len() != 20).unwrap_or(true) {
                return Err(TypesError::Contract(format!(
                    "malformed audit leaf: {}",
                    leaf
                )));
            }
        }
        Ok(())
    }

    /// Canonical bytes the signatures are computed over: the contract
    /// with both signature fields nulled.
    pub fn signable_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.renter_signature = None;
        unsigned.farmer_signature = None;
        canonical_bytes(&unsigned)
    }

    /// Sign one half of the contract. Refuses to touch a completed
    /// contract: once both signatures are present it is immutable.
    pub fn sign(&mut self, party: ContractParty, keypair: &KeyPair) -> Result<()> {
        if self.is_complete() {
            return Err(TypesError::Contract(
                "contract is complete and immutable".to_string(),
            ));
        }
        let signature = keypair.sign(&self.signable_bytes()?);
        match party {
            ContractParty::Renter => {
                self.renter_id = Some(keypair.node_id());
                self.renter_signature = Some(signature);
            }
            ContractParty::Farmer => {
                self.farmer_id = Some(keypair.node_id());
                self.farmer_signature = Some(signature);
            }
        }
        Ok(())
    }

    /// Verify one party's signature against the node id it claims.
    pub fn verify(&self, party: ContractParty, signer: &NodeId) -> bool {
        let bytes = match self.signable_bytes() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let signature = match party {
            ContractParty::Renter => &self.renter_signature,
            ContractParty::Farmer => &self.farmer_signature,
        };
        signature
            .as_ref()
            .map(|sig| sig.verify(&bytes, signer))
            .unwrap_or(false)
    }

    /// A contract is complete iff both signatures validate against the
    /// node ids the contract claims.
    pub fn is_complete(&self) -> bool {
        match (&self.renter_id, &self.farmer_id) {
            (Some(renter), Some(farmer)) => {
                self.verify(ContractParty::Renter, renter)
                    && self.verify(ContractParty::Farmer, farmer)
            }
            _ => false,
        }
    }
}
