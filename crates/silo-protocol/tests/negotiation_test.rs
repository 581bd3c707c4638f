use async_trait::async_trait;
use silo_protocol::audit::{audit_leaves, merkle_root, verify_proof};
use silo_protocol::messages::{
    AuditParams, AuditQuery, ConsignParams, OfferReply, RpcCall, RpcReply,
};
use silo_protocol::testing::{
    contract_shell, memory_manager, MemoryChannelClient, MemoryRouter, ScriptedTransport,
    StaticTunnelServer,
};
use silo_protocol::{
    FarmerNegotiator, NegotiatorConfig, Protocol, ProtocolConfig, ProtocolError, Result, Transport,
};
use silo_storage::{
    ItemRecord, MemoryBackend, Shard, ShardStore, StorageBackend, StorageConfig, StorageManager,
};
use silo_types::{Contact, Contract, ContractParty, DataHash, KeyPair};
use std::sync::Arc;
use std::time::Duration;

struct FarmerSide {
    keypair: KeyPair,
    manager: Arc<StorageManager>,
    router: Arc<MemoryRouter>,
    transport: Arc<ScriptedTransport>,
}

impl FarmerSide {
    fn new() -> Self {
        Self {
            keypair: KeyPair::generate(),
            manager: memory_manager(1 << 30),
            router: Arc::new(MemoryRouter::new()),
            transport: Arc::new(ScriptedTransport::new()),
        }
    }

    fn negotiator(&self, config: NegotiatorConfig) -> FarmerNegotiator {
        FarmerNegotiator::new(
            self.keypair.clone(),
            Arc::clone(&self.manager),
            self.router.clone(),
            self.transport.clone(),
            config,
        )
    }
}

fn renter_contact(renter: &KeyPair) -> Contact {
    Contact::new(renter.node_id(), "10.0.0.2", 4002)
}

// ---------------------------------------------------------------------------
// Admission gates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_negotiator_predicate_rejects_offer() {
    let side = FarmerSide::new();
    let negotiator = side
        .negotiator(NegotiatorConfig::default())
        .with_predicate(Arc::new(|_| false));

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"rejected shard");
    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    assert_eq!(negotiator.pending_count().await, 0);
    assert!(side.transport.sent().await.is_empty());
}

#[tokio::test]
async fn test_zero_concurrency_blocks_offers() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig {
        concurrency: 0,
        ..Default::default()
    });

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"gated shard");
    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    assert_eq!(negotiator.pending_count().await, 0);
    assert!(side.transport.sent().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_hash_suppressed_in_pending_list() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig::default());

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"duplicated shard");

    assert!(negotiator.admit_pending(&shell).await);
    assert!(!negotiator.admit_pending(&shell).await);
    assert_eq!(negotiator.pending_count().await, 1);
}

#[tokio::test]
async fn test_malformed_publication_dropped_silently() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig::default());

    negotiator
        .handle_publication(&serde_json::json!({ "version": 0, "garbage": true }))
        .await;

    assert_eq!(negotiator.pending_count().await, 0);
    assert!(side.transport.sent().await.is_empty());
}

// ---------------------------------------------------------------------------
// Renter lookup and the OFFER exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_renter_resolved_through_dht_lookup() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig::default());

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"distant renter shard");
    let first = renter_contact(&renter);
    let second = Contact::new(renter.node_id(), "10.0.0.3", 4003);
    side.router
        .stage_lookup(renter.node_id(), vec![first.clone(), second])
        .await;
    side.transport
        .stage_reply(Ok(RpcReply::Offer(OfferReply { contract: None })))
        .await;

    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    // FIND_NODE was consulted for the renter id and the offer went to
    // the first result.
    assert_eq!(side.router.lookup_calls().await, vec![renter.node_id()]);
    let sent = side.transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, first);

    let offered = match &sent[0].1 {
        RpcCall::Offer(params) => Contract::from_json(&params.contract).unwrap(),
        other => panic!("unexpected call: {:?}", other),
    };
    assert!(offered.verify(ContractParty::Farmer, &side.keypair.node_id()));
    assert_eq!(
        offered.payment_destination.as_deref(),
        Some(side.keypair.address().as_str())
    );

    // Renter refused to sign: the offer slot is released.
    assert_eq!(negotiator.pending_count().await, 0);
}

#[tokio::test]
async fn test_failed_lookup_abandons_negotiation() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig::default());

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"unlocatable renter");
    // No contact, no staged lookup result.
    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    assert_eq!(negotiator.pending_count().await, 0);
    assert!(side.transport.sent().await.is_empty());
}

#[tokio::test]
async fn test_transport_error_removes_pending_offer() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig::default());

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"lost offer shard");
    side.router.add_contact(renter_contact(&renter)).await;
    // No scripted reply: the transport double fails the send.

    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    assert_eq!(side.transport.sent().await.len(), 1);
    assert_eq!(negotiator.pending_count().await, 0);
}

#[tokio::test]
async fn test_invalid_renter_signature_in_response_dropped() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig::default());

    let renter = KeyPair::generate();
    let impostor = KeyPair::generate();
    let shell = contract_shell(&renter, b"forged response shard");
    let hash = shell.data_hash;
    side.router.add_contact(renter_contact(&renter)).await;

    // Response contract signed by the wrong renter key.
    let mut forged = contract_shell(&impostor, b"forged response shard");
    forged.sign(ContractParty::Farmer, &side.keypair).unwrap();
    side.transport
        .stage_reply(Ok(RpcReply::Offer(OfferReply {
            contract: Some(forged.to_json().unwrap()),
        })))
        .await;

    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    assert_eq!(negotiator.pending_count().await, 0);
    // The staged skeleton is still incomplete.
    let item = side.manager.load(&hash).await.unwrap();
    assert!(!item.contract_for(&renter.node_id()).unwrap().is_complete());
}

#[tokio::test]
async fn test_configured_payment_address_used() {
    let side = FarmerSide::new();
    let negotiator = side.negotiator(NegotiatorConfig {
        payment_address: Some("farm-wallet-7".to_string()),
        ..Default::default()
    });

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"paid shard");
    side.router.add_contact(renter_contact(&renter)).await;
    side.transport
        .stage_reply(Ok(RpcReply::Offer(OfferReply { contract: None })))
        .await;

    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    let sent = side.transport.sent().await;
    let offered = match &sent[0].1 {
        RpcCall::Offer(params) => Contract::from_json(&params.contract).unwrap(),
        other => panic!("unexpected call: {:?}", other),
    };
    assert_eq!(offered.payment_destination.as_deref(), Some("farm-wallet-7"));
}

// ---------------------------------------------------------------------------
// Capacity tracking
// ---------------------------------------------------------------------------

struct FailingBackend;

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, _hash: &DataHash) -> silo_storage::Result<Option<ItemRecord>> {
        Ok(None)
    }
    async fn put(&self, _hash: &DataHash, _record: &ItemRecord) -> silo_storage::Result<()> {
        Ok(())
    }
    async fn del(&self, _hash: &DataHash) -> silo_storage::Result<()> {
        Ok(())
    }
    async fn keys(&self) -> silo_storage::Result<Vec<DataHash>> {
        Ok(vec![])
    }
    async fn used_space(&self) -> silo_storage::Result<u64> {
        Err(silo_storage::StorageError::Backend("disk probe failed".to_string()))
    }
}

#[tokio::test]
async fn test_size_probe_failure_treated_as_no_space() {
    let manager = Arc::new(StorageManager::new(
        Arc::new(FailingBackend),
        ShardStore::new(),
        StorageConfig::default(),
    ));
    let transport = Arc::new(ScriptedTransport::new());
    let negotiator = FarmerNegotiator::new(
        KeyPair::generate(),
        manager,
        Arc::new(MemoryRouter::new()),
        transport.clone(),
        NegotiatorConfig::default(),
    );

    let renter = KeyPair::generate();
    let shell = contract_shell(&renter, b"unprobeable shard");
    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;

    assert_eq!(negotiator.pending_count().await, 0);
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn test_capacity_watcher_gates_admission() {
    let backend = Arc::new(MemoryBackend::new());
    let manager = Arc::new(StorageManager::new(
        backend,
        ShardStore::new(),
        StorageConfig {
            capacity_bytes: 16,
            ..Default::default()
        },
    ));
    let side_transport = Arc::new(ScriptedTransport::new());
    let negotiator = Arc::new(FarmerNegotiator::new(
        KeyPair::generate(),
        Arc::clone(&manager),
        Arc::new(MemoryRouter::new()),
        side_transport.clone(),
        NegotiatorConfig::default(),
    ));
    let _watcher = negotiator.spawn_capacity_watcher();

    // Fill the node past capacity.
    let renter = KeyPair::generate();
    let big = contract_shell(&renter, &[0u8; 64]);
    let mut item = silo_storage::StorageItem::new(manager.shards().open(big.data_hash).await);
    item.add_contract(renter.node_id(), big.clone()).unwrap();
    manager.save(&item).await.unwrap();

    for _ in 0..100 {
        if !negotiator.has_free_space() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!negotiator.has_free_space());

    // Locked storage drops publications outright.
    let shell = contract_shell(&renter, b"late shard");
    negotiator
        .handle_publication(&shell.to_json().unwrap())
        .await;
    assert_eq!(negotiator.pending_count().await, 0);

    // Freeing space unlocks admission again.
    manager.del(&big.data_hash).await.unwrap();
    for _ in 0..100 {
        if negotiator.has_free_space() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(negotiator.has_free_space());
}

// ---------------------------------------------------------------------------
// End-to-end lifecycle over a loopback transport
// ---------------------------------------------------------------------------

/// Delivers farmer-originated calls straight into the renter's protocol
/// instance, stamped with the farmer's contact.
struct Loopback {
    renter_protocol: Arc<Protocol>,
    farmer_contact: Contact,
}

#[async_trait]
impl Transport for Loopback {
    async fn send(&self, _contact: &Contact, call: RpcCall) -> Result<RpcReply> {
        self.renter_protocol.handle(&self.farmer_contact, call).await
    }

    async fn ping(&self, _contact: &Contact) -> Result<()> {
        Ok(())
    }

    fn requires_traversal(&self) -> bool {
        false
    }

    async fn create_port_mapping(&self, _port: u16) -> Result<()> {
        Err(ProtocolError::Mapping("loopback has no NAT device".to_string()))
    }
}

fn protocol_over(keypair: &KeyPair, contact: &Contact, manager: &Arc<StorageManager>) -> Protocol {
    Protocol::new(
        keypair.clone(),
        contact.clone(),
        Arc::clone(manager),
        Arc::new(MemoryRouter::new()),
        Arc::new(ScriptedTransport::new()),
        Arc::new(StaticTunnelServer::new(false, 4500, 4501)),
        Arc::new(MemoryChannelClient::new()),
        ProtocolConfig::default(),
    )
}

#[tokio::test]
async fn test_full_negotiation_consign_and_audit_lifecycle() {
    let data = b"the lifecycle shard".to_vec();

    // Renter node.
    let renter = KeyPair::generate();
    let renter_manager = memory_manager(1 << 30);
    let renter_node = Arc::new(protocol_over(
        &renter,
        &Contact::new(renter.node_id(), "10.0.0.2", 4002),
        &renter_manager,
    ));

    // Farmer node, wired to the renter through the loopback.
    let farmer = KeyPair::generate();
    let farmer_contact = Contact::new(farmer.node_id(), "10.0.0.3", 4003);
    let farmer_manager = memory_manager(1 << 30);
    let farmer_router = Arc::new(MemoryRouter::new());
    let negotiator = FarmerNegotiator::new(
        farmer.clone(),
        Arc::clone(&farmer_manager),
        farmer_router.clone(),
        Arc::new(Loopback {
            renter_protocol: Arc::clone(&renter_node),
            farmer_contact: farmer_contact.clone(),
        }),
        NegotiatorConfig::default(),
    );
    farmer_router
        .add_contact(Contact::new(renter.node_id(), "10.0.0.2", 4002))
        .await;

    // Renter opens the negotiation and publishes; the farmer picks the
    // publication up and runs the OFFER exchange.
    let shell = contract_shell(&renter, &data);
    let hash = shell.data_hash;
    let receiver = renter_node.pending().open(hash).await.unwrap();
    negotiator.handle_publication(&shell.to_json().unwrap()).await;

    let (accepting_farmer, completed) = receiver.await.unwrap();
    assert_eq!(accepting_farmer, farmer_contact);
    assert!(completed.is_complete());

    // Both sides hold the completed contract.
    let renter_item = renter_manager.load(&hash).await.unwrap();
    assert!(renter_item
        .contract_for(&farmer.node_id())
        .unwrap()
        .is_complete());
    let farmer_item = farmer_manager.load(&hash).await.unwrap();
    assert!(farmer_item
        .contract_for(&renter.node_id())
        .unwrap()
        .is_complete());
    assert_eq!(negotiator.pending_count().await, 0);

    // The renter consigns: audit tree over pre-generated challenges.
    let farmer_node = protocol_over(&farmer, &farmer_contact, &farmer_manager);
    let challenges: Vec<String> = (1..=4u8).map(|i| format!("{:02x}", i).repeat(16)).collect();
    let leaves = audit_leaves(&data, &challenges).unwrap();

    let renter_as_contact = Contact::new(renter.node_id(), "10.0.0.2", 4002);
    let reply = farmer_node
        .handle(
            &renter_as_contact,
            RpcCall::Consign(ConsignParams {
                data_hash: hash,
                audit_tree: leaves.clone(),
            }),
        )
        .await
        .unwrap();
    let token = match reply {
        RpcReply::Consign(reply) => reply.token,
        other => panic!("unexpected reply: {:?}", other),
    };

    // The data channel accepts the token once and receives the shard.
    farmer_node.authorizer().accept(&token, &hash).await.unwrap();
    if let Shard::Empty(sink) = farmer_manager.shards().open(hash).await {
        sink.write(&data).await.unwrap();
        sink.commit().await.unwrap();
    }

    // The renter now audits custody.
    let root = {
        let decoded: Vec<[u8; 20]> = leaves
            .iter()
            .map(|leaf| {
                let bytes = hex::decode(leaf).unwrap();
                let mut arr = [0u8; 20];
                arr.copy_from_slice(&bytes);
                arr
            })
            .collect();
        merkle_root(&decoded)
    };
    let queries = vec![
        AuditQuery {
            data_hash: hash,
            challenge: challenges[1].clone(),
        },
        AuditQuery {
            data_hash: hash,
            challenge: challenges[3].clone(),
        },
    ];
    let reply = farmer_node
        .handle(
            &renter_as_contact,
            RpcCall::Audit(AuditParams {
                audits: serde_json::to_value(&queries).unwrap(),
            }),
        )
        .await
        .unwrap();

    let proofs = match reply {
        RpcReply::Audit(reply) => reply.proofs,
        other => panic!("unexpected reply: {:?}", other),
    };
    assert_eq!(proofs.len(), 2);
    assert_eq!(proofs[0].leaf_index, 1);
    assert_eq!(proofs[1].leaf_index, 3);
    for proof in &proofs {
        assert!(verify_proof(proof, &root));
    }
}
