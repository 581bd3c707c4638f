//! ECDSA keypairs and DER signatures over secp256k1.
//!
//! Signatures are verified against bare [`NodeId`]s rather than public
//! keys: the verifier recovers the candidate public keys from the compact
//! form of the signature and checks whether any of them hashes to the
//! claimed node id. This lets signed documents carry only 20-byte
//! identities on the wire.

use crate::error::{Result, TypesError};
use crate::hash::{hash160, sha256};
use crate::id::NodeId;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature as EcdsaSignature};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// DER-encoded ECDSA signature.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_der(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(hex::decode(s)?))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Verify this signature over `data` against a claimed signer identity.
    ///
    /// Recovers the public key from the signature's compact form (trying
    /// each recovery id) and accepts iff one candidate hashes to `signer`.
    pub fn verify(&self, data: &[u8], signer: &NodeId) -> bool {
        let parsed = match EcdsaSignature::from_der(&self.0) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
        let compact = parsed.serialize_compact();
        let message = Message::from_digest(sha256(data));
        let secp = Secp256k1::new();

        for rec in 0..4 {
            let recovery_id = match RecoveryId::from_i32(rec) {
                Ok(id) => id,
                Err(_) => continue,
            };
            let recoverable = match RecoverableSignature::from_compact(&compact, recovery_id) {
                Ok(sig) => sig,
                Err(_) => continue,
            };
            if let Ok(pubkey) = secp.recover_ecdsa(&message, &recoverable) {
                if hash160(&pubkey.serialize()) == *signer.as_bytes() {
                    return true;
                }
            }
        }
        false
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Signature(empty)")
        } else {
            write!(f, "Signature({}...)", &self.to_hex()[..8])
        }
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// secp256k1 keypair backing a node's identity and wallet address.
#[derive(Clone)]
pub struct KeyPair {
    secp: Secp256k1<All>,
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        Self {
            secp,
            secret,
            public,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret =
            SecretKey::from_slice(bytes).map_err(|e| TypesError::Key(e.to_string()))?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(Self {
            secp,
            secret,
            public,
        })
    }

    /// DER-encoded ECDSA signature over the SHA-256 digest of `data`.
    pub fn sign(&self, data: &[u8]) -> Signature {
        let message = Message::from_digest(sha256(data));
        let sig = self.secp.sign_ecdsa(&message, &self.secret);
        Signature::from_der(sig.serialize_der().to_vec())
    }

    pub fn public_key(&self) -> [u8; 33] {
        self.public.serialize()
    }

    /// Node identity: hash160 of the compressed public key.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_bytes(hash160(&self.public.serialize()))
    }

    /// Wallet address derived from the keypair (hex of the public key's
    /// hash160). Payment fields treat addresses as opaque strings.
    pub fn address(&self) -> String {
        hex::encode(hash160(&self.public.serialize()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.node_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"contract bytes");
        assert!(sig.verify(b"contract bytes", &keypair.node_id()));
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let sig = keypair.sign(b"contract bytes");
        assert!(!sig.verify(b"contract bytes", &other.node_id()));
    }

    #[test]
    fn test_verify_rejects_tampered_data() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"contract bytes");
        assert!(!sig.verify(b"different bytes", &keypair.node_id()));
    }

    #[test]
    fn test_verify_rejects_garbage_der() {
        let sig = Signature::from_der(vec![0u8; 16]);
        assert!(!sig.verify(b"data", &KeyPair::generate().node_id()));
    }

    #[test]
    fn test_signature_hex_round_trip() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"data");
        let back = Signature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_from_secret_bytes_is_deterministic() {
        let seed = [7u8; 32];
        let a = KeyPair::from_secret_bytes(&seed).unwrap();
        let b = KeyPair::from_secret_bytes(&seed).unwrap();
        assert_eq!(a.node_id(), b.node_id());
        assert_eq!(a.address(), b.address());
    }
}
