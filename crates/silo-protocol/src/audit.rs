//! Challenge-response custody proofs over a per-renter audit tree.
//!
//! At consignment time the renter hands the farmer the bottom leaves of
//! an audit tree: one leaf per pre-generated challenge, where
//! `leaf = hash160(hash160(challenge || shard))`. To answer an audit the
//! farmer streams the shard once through a challenge-seeded digest,
//! producing `response = hash160(challenge || shard)`, locates
//! `hash160(response)` among the leaves, and returns the response with a
//! Merkle authentication path to the tree root. The renter verifies the
//! path against the root it kept.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use silo_storage::{Shard, StorageManager};
use silo_types::hash::{hash160, ripemd160};
use silo_types::{DataHash, NodeId};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const STREAM_CHUNK: usize = 8192;
const EMPTY_LEAF: [u8; 20] = [0u8; 20];

/// Compact Merkle authentication path for one challenged leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditProof {
    /// Position of the challenged leaf in the (padded) tree.
    pub leaf_index: usize,
    /// `hash160(challenge || shard)`, hex.
    pub response: String,
    /// Sibling hashes from leaf level to the root, hex.
    pub path: Vec<String>,
}

/// Single-shot proof generator bound to the local storage manager.
pub struct ShardProver {
    manager: Arc<StorageManager>,
}

impl ShardProver {
    pub fn new(manager: Arc<StorageManager>) -> Self {
        Self { manager }
    }

    /// Prove custody of `hash` for the renter `node_id` under
    /// `challenge`. Identical `(shard, tree, challenge)` inputs produce
    /// identical proofs.
    pub async fn prove(
        &self,
        hash: &DataHash,
        challenge: &str,
        node_id: &NodeId,
    ) -> Result<AuditProof> {
        let item = self
            .manager
            .load(hash)
            .await
            .map_err(ProtocolError::LoadFailed)?;

        let leaves = match item.tree_for(node_id) {
            Some(leaves) => decode_leaves(leaves)?,
            None => return Err(ProtocolError::NoTree),
        };

        let source = match &item.shard {
            Shard::Present(source) => source,
            Shard::Empty(_) => return Err(ProtocolError::NotFound),
        };

        let reader = source
            .open_reader()
            .await
            .map_err(ProtocolError::LoadFailed)?;
        let response = challenge_response(challenge, reader).await?;

        let leaf = hash160(&response);
        let leaf_index = leaves
            .iter()
            .position(|candidate| *candidate == leaf)
            .ok_or(ProtocolError::ProofFailed)?;

        let path = authentication_path(&leaves, leaf_index);
        debug!(hash = %hash, renter = %node_id, leaf_index, "Audit proof generated");

        Ok(AuditProof {
            leaf_index,
            response: hex::encode(response),
            path: path.iter().map(hex::encode).collect(),
        })
    }
}

/// Stream `reader` once through a digest seeded with the challenge
/// bytes: `hash160(challenge || shard)`.
pub async fn challenge_response(
    challenge: &str,
    mut reader: impl AsyncRead + Send + Unpin,
) -> Result<[u8; 20]> {
    let challenge_bytes = hex::decode(challenge)
        .map_err(|e| ProtocolError::InvalidFormat(format!("malformed challenge: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&challenge_bytes);

    let mut buf = [0u8; STREAM_CHUNK];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| ProtocolError::Channel(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(ripemd160(&hasher.finalize()))
}

/// Renter-side leaf generation: one leaf per challenge over the shard
/// bytes, in challenge order.
pub fn audit_leaves(data: &[u8], challenges: &[String]) -> Result<Vec<String>> {
    challenges
        .iter()
        .map(|challenge| {
            let challenge_bytes = hex::decode(challenge)
                .map_err(|e| ProtocolError::InvalidFormat(format!("malformed challenge: {}", e)))?;
            let mut hasher = Sha256::new();
            hasher.update(&challenge_bytes);
            hasher.update(data);
            let response = ripemd160(&hasher.finalize());
            Ok(hex::encode(hash160(&response)))
        })
        .collect()
}

/// Root of the audit tree over `leaves`, padded to a power of two with
/// the empty leaf.
pub fn merkle_root(leaves: &[[u8; 20]]) -> [u8; 20] {
    let mut level = padded(leaves);
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| join(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Sibling hashes from the leaf level up to (excluding) the root.
pub fn authentication_path(leaves: &[[u8; 20]], index: usize) -> Vec<[u8; 20]> {
    let mut level = padded(leaves);
    let mut index = index;
    let mut path = Vec::new();

    while level.len() > 1 {
        path.push(level[index ^ 1]);
        level = level
            .chunks(2)
            .map(|pair| join(&pair[0], &pair[1]))
            .collect();
        index /= 2;
    }
    path
}

/// Recompute the root from a proof and compare against the renter's
/// stored root.
pub fn verify_proof(proof: &AuditProof, root: &[u8; 20]) -> bool {
    let response = match decode_hash(&proof.response) {
        Some(response) => response,
        None => return false,
    };

    let mut node = hash160(&response);
    let mut index = proof.leaf_index;
    for sibling in &proof.path {
        let sibling = match decode_hash(sibling) {
            Some(sibling) => sibling,
            None => return false,
        };
        node = if index % 2 == 0 {
            join(&node, &sibling)
        } else {
            join(&sibling, &node)
        };
        index /= 2;
    }
    node == *root
}

fn padded(leaves: &[[u8; 20]]) -> Vec<[u8; 20]> {
    let mut level: Vec<[u8; 20]> = leaves.to_vec();
    let width = level.len().next_power_of_two().max(2);
    level.resize(width, EMPTY_LEAF);
    level
}

fn join(left: &[u8; 20], right: &[u8; 20]) -> [u8; 20] {
    let mut data = [0u8; 40];
    data[..20].copy_from_slice(left);
    data[20..].copy_from_slice(right);
    hash160(&data)
}

fn decode_hash(hex_str: &str) -> Option<[u8; 20]> {
    let bytes = hex::decode(hex_str).ok()?;
    if bytes.len() != 20 {
        return None;
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&bytes);
    Some(arr)
}

fn decode_leaves(leaves: &[String]) -> Result<Vec<[u8; 20]>> {
    leaves
        .iter()
        .map(|leaf| {
            decode_hash(leaf)
                .ok_or_else(|| ProtocolError::InvalidFormat(format!("malformed audit leaf: {}", leaf)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn challenges(n: usize) -> Vec<String> {
        (0..n).map(|i| hex::encode([i as u8 + 1; 16])).collect()
    }

    #[tokio::test]
    async fn test_response_matches_leaf_generation() {
        let data = b"the shard bytes".to_vec();
        let challenges = challenges(4);
        let leaves = audit_leaves(&data, &challenges).unwrap();

        let response = challenge_response(&challenges[2], Cursor::new(data))
            .await
            .unwrap();
        assert_eq!(hex::encode(hash160(&response)), leaves[2]);
    }

    #[tokio::test]
    async fn test_response_is_deterministic() {
        let data = b"same bytes".to_vec();
        let challenge = hex::encode([7u8; 16]);
        let a = challenge_response(&challenge, Cursor::new(data.clone()))
            .await
            .unwrap();
        let b = challenge_response(&challenge, Cursor::new(data)).await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_path_recomputes_root() {
        let data = b"merkle shard".to_vec();
        let challenge_set = challenges(5);
        let leaf_hex = audit_leaves(&data, &challenge_set).unwrap();
        let leaves: Vec<[u8; 20]> = leaf_hex
            .iter()
            .map(|l| decode_hash(l).unwrap())
            .collect();
        let root = merkle_root(&leaves);

        for (index, challenge) in challenge_set.iter().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(hex::decode(challenge).unwrap());
            hasher.update(&data);
            let response = ripemd160(&hasher.finalize());

            let proof = AuditProof {
                leaf_index: index,
                response: hex::encode(response),
                path: authentication_path(&leaves, index)
                    .iter()
                    .map(hex::encode)
                    .collect(),
            };
            assert!(verify_proof(&proof, &root));
        }
    }

    #[test]
    fn test_bad_response_fails_verification() {
        let leaf_hex = audit_leaves(b"shard", &challenges(3)).unwrap();
        let leaves: Vec<[u8; 20]> = leaf_hex
            .iter()
            .map(|l| decode_hash(l).unwrap())
            .collect();
        let root = merkle_root(&leaves);

        let proof = AuditProof {
            leaf_index: 0,
            response: hex::encode([0xEE; 20]),
            path: authentication_path(&leaves, 0)
                .iter()
                .map(hex::encode)
                .collect(),
        };
        assert!(!verify_proof(&proof, &root));
    }

    #[test]
    fn test_single_leaf_tree() {
        let leaves = vec![[3u8; 20]];
        let root = merkle_root(&leaves);
        // One leaf pads to a pair with the empty leaf.
        assert_eq!(root, join(&[3u8; 20], &EMPTY_LEAF));
        assert_eq!(authentication_path(&leaves, 0), vec![EMPTY_LEAF]);
    }

    #[tokio::test]
    async fn test_rejects_malformed_challenge() {
        let result = challenge_response("zz-not-hex", Cursor::new(Vec::new())).await;
        assert!(result.is_err());
    }
}
