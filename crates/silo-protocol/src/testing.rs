//! In-memory collaborator doubles and fixture builders for protocol
//! tests.

use crate::error::{ProtocolError, Result};
use crate::messages::{RpcCall, RpcReply};
use crate::net::{DataChannelClient, Gateway, RoutingTable, Transport, TunnelServer};
use async_trait::async_trait;
use chrono::Utc;
use silo_storage::{MemoryBackend, ShardStore, StorageConfig, StorageManager};
use silo_types::{Contact, Contract, ContractParty, ContractVersion, DataHash, KeyPair, NodeId};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, RwLock};

/// Routing table double with scripted lookup results.
#[derive(Default)]
pub struct MemoryRouter {
    contacts: RwLock<HashMap<NodeId, Contact>>,
    lookups: RwLock<HashMap<NodeId, Vec<Contact>>>,
    lookup_calls: Mutex<Vec<NodeId>>,
    neighbors: RwLock<Vec<Contact>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.contacts.write().await.insert(contact.node_id, contact);
    }

    /// Script the result of a FIND_NODE lookup for `node_id`.
    pub async fn stage_lookup(&self, node_id: NodeId, contacts: Vec<Contact>) {
        self.lookups.write().await.insert(node_id, contacts);
    }

    pub async fn set_neighbors(&self, neighbors: Vec<Contact>) {
        *self.neighbors.write().await = neighbors;
    }

    /// Node ids FIND_NODE was invoked for, in call order.
    pub async fn lookup_calls(&self) -> Vec<NodeId> {
        self.lookup_calls.lock().await.clone()
    }
}

#[async_trait]
impl RoutingTable for MemoryRouter {
    async fn get_contact(&self, node_id: &NodeId) -> Option<Contact> {
        self.contacts.read().await.get(node_id).cloned()
    }

    async fn find_node(&self, node_id: &NodeId) -> Result<Vec<Contact>> {
        self.lookup_calls.lock().await.push(*node_id);
        Ok(self
            .lookups
            .read()
            .await
            .get(node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn nearest(&self, _target: &NodeId, limit: usize, exclude: &[NodeId]) -> Vec<Contact> {
        self.neighbors
            .read()
            .await
            .iter()
            .filter(|c| !exclude.contains(&c.node_id))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Transport double that records sends and pops scripted replies.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<RpcReply>>>,
    sent: Mutex<Vec<(Contact, RpcCall)>>,
    ping_fails: AtomicBool,
    traversal: AtomicBool,
    mapping_fails: AtomicBool,
    mapped_ports: Mutex<Vec<u16>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stage_reply(&self, reply: Result<RpcReply>) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn sent(&self) -> Vec<(Contact, RpcCall)> {
        self.sent.lock().await.clone()
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_requires_traversal(&self, behind_nat: bool) {
        self.traversal.store(behind_nat, Ordering::SeqCst);
    }

    pub fn set_mapping_fails(&self, fails: bool) {
        self.mapping_fails.store(fails, Ordering::SeqCst);
    }

    pub async fn mapped_ports(&self) -> Vec<u16> {
        self.mapped_ports.lock().await.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, contact: &Contact, call: RpcCall) -> Result<RpcReply> {
        self.sent.lock().await.push((contact.clone(), call));
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ProtocolError::Transport("no scripted reply".to_string())))
    }

    async fn ping(&self, _contact: &Contact) -> Result<()> {
        if self.ping_fails.load(Ordering::SeqCst) {
            Err(ProtocolError::Transport("ping timed out".to_string()))
        } else {
            Ok(())
        }
    }

    fn requires_traversal(&self) -> bool {
        self.traversal.load(Ordering::SeqCst)
    }

    async fn create_port_mapping(&self, port: u16) -> Result<()> {
        if self.mapping_fails.load(Ordering::SeqCst) {
            return Err(ProtocolError::Mapping("device refused".to_string()));
        }
        self.mapped_ports.lock().await.push(port);
        Ok(())
    }
}

/// Tunnel server double with fixed gateway parameters.
pub struct StaticTunnelServer {
    available: AtomicBool,
    fail_gateway: AtomicBool,
    listen_port: u16,
    entrance_port: u16,
}

impl StaticTunnelServer {
    pub fn new(available: bool, listen_port: u16, entrance_port: u16) -> Self {
        Self {
            available: AtomicBool::new(available),
            fail_gateway: AtomicBool::new(false),
            listen_port,
            entrance_port,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_gateway(&self, fails: bool) {
        self.fail_gateway.store(fails, Ordering::SeqCst);
    }
}

#[async_trait]
impl TunnelServer for StaticTunnelServer {
    fn has_tunnel_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn create_gateway(&self) -> Result<Gateway> {
        if self.fail_gateway.load(Ordering::SeqCst) {
            return Err(ProtocolError::Gateway("no gateway slots".to_string()));
        }
        Ok(Gateway {
            entrance_token: "entrance-token".to_string(),
            entrance_port: self.entrance_port,
        })
    }

    fn listen_port(&self) -> u16 {
        self.listen_port
    }
}

/// Data-channel client double serving staged shard bytes.
#[derive(Default)]
pub struct MemoryChannelClient {
    shards: RwLock<HashMap<DataHash, Vec<u8>>>,
    fail: AtomicBool,
    opened: Mutex<Vec<(Contact, String, DataHash)>>,
}

impl MemoryChannelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stage_shard(&self, hash: DataHash, bytes: Vec<u8>) {
        self.shards.write().await.insert(hash, bytes);
    }

    pub fn set_fail(&self, fails: bool) {
        self.fail.store(fails, Ordering::SeqCst);
    }

    pub async fn opened(&self) -> Vec<(Contact, String, DataHash)> {
        self.opened.lock().await.clone()
    }
}

#[async_trait]
impl DataChannelClient for MemoryChannelClient {
    async fn open_read_stream(
        &self,
        farmer: &Contact,
        token: &str,
        hash: &DataHash,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.opened
            .lock()
            .await
            .push((farmer.clone(), token.to_string(), *hash));

        if self.fail.load(Ordering::SeqCst) {
            return Err(ProtocolError::Channel("connection refused".to_string()));
        }
        let bytes = self
            .shards
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| ProtocolError::Channel("no staged shard".to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// Storage manager over fresh in-memory backends.
pub fn memory_manager(capacity_bytes: u64) -> Arc<StorageManager> {
    Arc::new(StorageManager::new(
        Arc::new(MemoryBackend::new()),
        ShardStore::new(),
        StorageConfig {
            capacity_bytes,
            ..Default::default()
        },
    ))
}

/// Deterministically seeded contact.
pub fn contact(seed: u8) -> Contact {
    Contact::new(
        NodeId::from_bytes([seed; 20]),
        format!("10.0.0.{}", seed),
        4000 + seed as u16,
    )
}

/// Renter-signed contract shell over `data`, storage window open around
/// now.
pub fn contract_shell(renter: &KeyPair, data: &[u8]) -> Contract {
    let now = Utc::now().timestamp_millis();
    let mut contract = Contract {
        version: ContractVersion::V0,
        renter_id: Some(renter.node_id()),
        farmer_id: None,
        renter_signature: None,
        farmer_signature: None,
        payment_source: Some(renter.address()),
        payment_destination: None,
        payment_amount: 100,
        payment_interval: 86_400_000,
        data_hash: DataHash::of(data),
        data_size: data.len() as u64,
        store_begin: now,
        store_end: now + 3_600_000,
        audit_count: 4,
        audit_leaves: vec![],
    };
    contract
        .sign(ContractParty::Renter, renter)
        .expect("shell contract is never complete before signing");
    contract
}
