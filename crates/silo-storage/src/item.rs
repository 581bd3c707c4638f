use crate::backend::{ItemRecord, Result, StorageError};
use crate::shard::Shard;
use silo_types::{Contract, DataHash, NodeId};
use std::collections::HashMap;

/// Aggregate per-shard record: the shard handle, the farmer-indexed
/// contracts, and the per-renter audit trees and issued challenges.
///
/// Invariant: `hash` equals every contract's `data_hash`.
pub struct StorageItem {
    pub hash: DataHash,
    pub shard: Shard,
    pub contracts: HashMap<NodeId, Contract>,
    pub trees: HashMap<NodeId, Vec<String>>,
    pub challenges: HashMap<NodeId, Vec<String>>,
}

impl StorageItem {
    /// Fresh item around an open shard handle.
    pub fn new(shard: Shard) -> Self {
        Self {
            hash: shard.hash(),
            shard,
            contracts: HashMap::new(),
            trees: HashMap::new(),
            challenges: HashMap::new(),
        }
    }

    pub fn from_record(record: ItemRecord, shard: Shard) -> Self {
        Self {
            hash: record.hash,
            shard,
            contracts: record.contracts,
            trees: record.trees,
            challenges: record.challenges,
        }
    }

    pub fn record(&self) -> ItemRecord {
        ItemRecord {
            hash: self.hash,
            contracts: self.contracts.clone(),
            trees: self.trees.clone(),
            challenges: self.challenges.clone(),
        }
    }

    /// Index a contract under the counterparty's node id. Rejects
    /// contracts whose data hash disagrees with the item.
    pub fn add_contract(&mut self, node_id: NodeId, contract: Contract) -> Result<()> {
        if contract.data_hash != self.hash {
            return Err(StorageError::HashMismatch {
                contract: contract.data_hash,
                item: self.hash,
            });
        }
        self.contracts.insert(node_id, contract);
        Ok(())
    }

    pub fn contract_for(&self, node_id: &NodeId) -> Option<&Contract> {
        self.contracts.get(node_id)
    }

    /// Install a renter's audit tree (the bottom leaves).
    pub fn set_tree(&mut self, renter_id: NodeId, leaves: Vec<String>) {
        self.trees.insert(renter_id, leaves);
    }

    pub fn tree_for(&self, renter_id: &NodeId) -> Option<&Vec<String>> {
        self.trees.get(renter_id)
    }

    /// True once every contract's storage window has passed `now_ms`.
    pub fn all_contracts_expired(&self, now_ms: i64) -> bool {
        !self.contracts.is_empty() && self.contracts.values().all(|c| c.store_end < now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardStore;
    use silo_types::{ContractParty, ContractVersion, KeyPair};

    fn contract(hash: DataHash, renter: &KeyPair, begin: i64, end: i64) -> Contract {
        let mut contract = Contract {
            version: ContractVersion::V0,
            renter_id: Some(renter.node_id()),
            farmer_id: None,
            renter_signature: None,
            farmer_signature: None,
            payment_source: None,
            payment_destination: None,
            payment_amount: 10,
            payment_interval: 60_000,
            data_hash: hash,
            data_size: 4,
            store_begin: begin,
            store_end: end,
            audit_count: 2,
            audit_leaves: vec![],
        };
        contract.sign(ContractParty::Renter, renter).unwrap();
        contract
    }

    #[tokio::test]
    async fn test_add_contract_enforces_hash() {
        let store = ShardStore::new();
        let hash = DataHash::of(b"item");
        let renter = KeyPair::generate();
        let mut item = StorageItem::new(store.open(hash).await);

        let good = contract(hash, &renter, 0, 100);
        item.add_contract(renter.node_id(), good).unwrap();

        let bad = contract(DataHash::of(b"other"), &renter, 0, 100);
        assert!(item.add_contract(renter.node_id(), bad).is_err());
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let store = ShardStore::new();
        let hash = DataHash::of(b"item");
        let renter = KeyPair::generate();
        let mut item = StorageItem::new(store.open(hash).await);
        item.add_contract(renter.node_id(), contract(hash, &renter, 0, 100))
            .unwrap();
        item.set_tree(renter.node_id(), vec!["00".repeat(20)]);

        let record = item.record();
        let restored = StorageItem::from_record(record, store.open(hash).await);
        assert_eq!(restored.hash, hash);
        assert!(restored.contract_for(&renter.node_id()).is_some());
        assert!(restored.tree_for(&renter.node_id()).is_some());
    }

    #[tokio::test]
    async fn test_expiry_requires_all_contracts_past() {
        let store = ShardStore::new();
        let hash = DataHash::of(b"item");
        let renter = KeyPair::generate();
        let other = KeyPair::generate();
        let mut item = StorageItem::new(store.open(hash).await);
        item.add_contract(renter.node_id(), contract(hash, &renter, 0, 100))
            .unwrap();
        item.add_contract(other.node_id(), contract(hash, &other, 0, 500))
            .unwrap();

        assert!(!item.all_contracts_expired(200));
        assert!(item.all_contracts_expired(600));
    }
}
