pub mod canonical;
pub mod contact;
pub mod contract;
pub mod error;
pub mod hash;
pub mod id;
pub mod keys;

pub use canonical::{canonical_bytes, to_canonical_json};
pub use contact::Contact;
pub use contract::{Contract, ContractParty, ContractVersion};
pub use error::{Result, TypesError};
pub use hash::{hash160, sha256};
pub use id::{DataHash, NodeId};
pub use keys::{KeyPair, Signature};
