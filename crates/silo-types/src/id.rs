use crate::error::{Result, TypesError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! hash160_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 20]);

        impl $name {
            pub fn from_bytes(bytes: [u8; 20]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 20] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self> {
                let bytes = hex::decode(s)?;
                if bytes.len() != 20 {
                    return Err(TypesError::InvalidLength {
                        expected: 20,
                        actual: bytes.len(),
                    });
                }
                let mut arr = [0u8; 20];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({}...)"), &self.to_hex()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hash160_newtype!(
    NodeId,
    "20-byte node identity: hash160 of the node's compressed public key."
);
hash160_newtype!(
    DataHash,
    "20-byte shard identity: RIPEMD-160 content hash of the shard bytes."
);

impl DataHash {
    /// Content hash of a shard's bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(crate::hash::hash160(data))
    }
}
