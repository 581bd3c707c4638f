//! Digest helpers used for node identities, data hashes, and audit leaves.
//!
//! All 20-byte identifiers in the network are RIPEMD-160 over SHA-256
//! (hash160) of some byte string: node ids hash the compressed public key,
//! data hashes hash the shard contents.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD-160 over SHA-256 (hash160) of `data`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = sha256(data);
    let mut hasher = Ripemd160::new();
    hasher.update(sha);
    hasher.finalize().into()
}

/// RIPEMD-160 over an already-computed SHA-256 digest.
///
/// Used by streaming callers that feed chunks through a [`Sha256`] hasher
/// and fold the result once the stream is exhausted.
pub fn ripemd160(digest: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(digest);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash160_is_ripemd_over_sha() {
        let data = b"shard bytes";
        assert_eq!(hash160(data), ripemd160(&sha256(data)));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(sha256(b"a"), sha256(b"a"));
        assert_ne!(hash160(b"a"), hash160(b"b"));
    }
}
