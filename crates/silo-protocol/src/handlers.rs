//! The nine-message request router.
//!
//! Each handler is a short finite-state routine against the storage
//! manager, the pending-offer registry, and the channel authorizer.
//! Handlers are pure with respect to each other except through those
//! components; shared state is only touched between await points, and
//! the pending entry for a hash is removed only after the corresponding
//! save has succeeded.

use crate::audit::ShardProver;
use crate::channel::{ChannelAuthorizer, ChannelConfig};
use crate::error::{ProtocolError, Result};
use crate::messages::{
    AuditParams, AuditQuery, AuditReply, ConsignParams, ConsignReply, EmptyReply, FindTunnelParams,
    FindTunnelReply, MirrorParams, OfferParams, OfferReply, OpenTunnelReply, RetrieveParams,
    RetrieveReply, RpcCall, RpcReply, RpcResponse, TriggerParams, TunnelAlias,
};
use crate::net::{DataChannelClient, RoutingTable, Transport, TunnelServer};
use crate::pending::PendingOfferRegistry;
use crate::triggers::TriggerRegistry;
use crate::tunnel::{TunnelBroker, TunnelConfig};
use crate::{CONSIGN_THRESHOLD_MS, MAX_CONCURRENT_AUDITS, MAX_FIND_TUNNEL_RELAYS};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use silo_storage::{Shard, ShardSink, StorageItem, StorageManager};
use silo_types::{Contact, Contract, ContractParty, DataHash, KeyPair, NodeId};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;
const PIPE_CHUNK: usize = 8192;

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Widest window before `store_begin` during which consignment is
    /// accepted, in milliseconds.
    pub consign_threshold_ms: i64,
    /// Per-request bound on concurrent audit proofs.
    pub max_concurrent_audits: usize,
    /// FIND_TUNNEL relay depth bound.
    pub max_find_tunnel_relays: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            consign_threshold_ms: CONSIGN_THRESHOLD_MS,
            max_concurrent_audits: MAX_CONCURRENT_AUDITS,
            max_find_tunnel_relays: MAX_FIND_TUNNEL_RELAYS,
        }
    }
}

/// Out-of-band notifications emitted by the handlers.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// A complete, validly signed offer arrived for a hash with no open
    /// negotiation.
    UnhandledOffer { contact: Contact, contract: Contract },
}

/// Protocol instance: routes inbound requests and owns the negotiation
/// state shared between handlers.
pub struct Protocol {
    keypair: KeyPair,
    self_contact: Contact,
    manager: Arc<StorageManager>,
    prover: ShardProver,
    pending: PendingOfferRegistry,
    authorizer: ChannelAuthorizer,
    broker: TunnelBroker,
    triggers: TriggerRegistry,
    router: Arc<dyn RoutingTable>,
    transport: Arc<dyn Transport>,
    tunnel_server: Arc<dyn TunnelServer>,
    channel_client: Arc<dyn DataChannelClient>,
    events: broadcast::Sender<ProtocolEvent>,
    config: ProtocolConfig,
}

impl Protocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        keypair: KeyPair,
        self_contact: Contact,
        manager: Arc<StorageManager>,
        router: Arc<dyn RoutingTable>,
        transport: Arc<dyn Transport>,
        tunnel_server: Arc<dyn TunnelServer>,
        channel_client: Arc<dyn DataChannelClient>,
        config: ProtocolConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            keypair,
            self_contact,
            prover: ShardProver::new(Arc::clone(&manager)),
            manager,
            pending: PendingOfferRegistry::new(),
            authorizer: ChannelAuthorizer::new(ChannelConfig::default()),
            broker: TunnelBroker::new(TunnelConfig::default()),
            triggers: TriggerRegistry::new(),
            router,
            transport,
            tunnel_server,
            channel_client,
            events,
            config,
        }
    }

    pub fn pending(&self) -> &PendingOfferRegistry {
        &self.pending
    }

    pub fn authorizer(&self) -> &ChannelAuthorizer {
        &self.authorizer
    }

    pub fn broker(&self) -> &TunnelBroker {
        &self.broker
    }

    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    /// Route one inbound request to its handler.
    pub async fn handle(&self, contact: &Contact, call: RpcCall) -> Result<RpcReply> {
        debug!(method = call.method(), sender = %contact.node_id, "Handling request");
        match call {
            RpcCall::Offer(params) => self.offer(contact, params).await,
            RpcCall::Consign(params) => self.consign(contact, params).await,
            RpcCall::Mirror(params) => self.mirror(contact, params).await,
            RpcCall::Retrieve(params) => self.retrieve(contact, params).await,
            RpcCall::Audit(params) => self.audit(contact, params).await,
            RpcCall::Probe(_) => self.probe(contact).await,
            RpcCall::FindTunnel(params) => self.find_tunnel(contact, params).await,
            RpcCall::OpenTunnel(_) => self.open_tunnel().await,
            RpcCall::Trigger(params) => self.trigger(contact, params).await,
        }
    }

    /// Handle a request and fold the outcome into a wire envelope.
    pub async fn respond(&self, contact: &Contact, call: RpcCall) -> RpcResponse {
        RpcResponse::from_result(self.handle(contact, call).await)
    }

    /// OFFER: a farmer extends its signed half of a published contract.
    async fn offer(&self, contact: &Contact, params: OfferParams) -> Result<RpcReply> {
        let mut contract = Contract::from_json(&params.contract)
            .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?;

        if !contract.verify(ContractParty::Farmer, &contact.node_id) {
            warn!(farmer = %contact.node_id, "Offer carries an invalid farmer signature");
            return Err(ProtocolError::InvalidSignature);
        }

        if !contract.verify(ContractParty::Renter, &self.keypair.node_id()) {
            contract.sign(ContractParty::Renter, &self.keypair)?;
        }
        if !contract.is_complete() {
            return Err(ProtocolError::Incomplete);
        }

        let hash = contract.data_hash;
        if !self.pending.contains(&hash).await {
            warn!(hash = %hash, farmer = %contact.node_id, "Offer for a hash with no open negotiation");
            let _ = self.events.send(ProtocolEvent::UnhandledOffer {
                contact: contact.clone(),
                contract,
            });
            return Err(ProtocolError::NotOpen);
        }
        if self.pending.is_blacklisted(&hash, &contact.node_id).await {
            return Err(ProtocolError::NotOpen);
        }

        let mut item = StorageItem::new(self.manager.shards().open(hash).await);
        item.add_contract(contact.node_id, contract.clone())
            .map_err(ProtocolError::SaveFailed)?;
        self.manager
            .save(&item)
            .await
            .map_err(ProtocolError::SaveFailed)?;

        let reply = RpcReply::Offer(OfferReply {
            contract: Some(contract.to_json()?),
        });

        // The entry leaves the registry only now that the item is
        // persisted; the resolver hands the contract to the consignment
        // logic, which runs after this reply is on its way.
        if !self.pending.resolve(&hash, contact.clone(), contract).await {
            return Err(ProtocolError::NotOpen);
        }
        info!(hash = %hash, farmer = %contact.node_id, "Offer accepted");
        Ok(reply)
    }

    /// CONSIGN: the renter installs its audit tree and asks for an
    /// upload token.
    async fn consign(&self, contact: &Contact, params: ConsignParams) -> Result<RpcReply> {
        let mut item = self
            .manager
            .load(&params.data_hash)
            .await
            .map_err(ProtocolError::LoadFailed)?;

        let contract = item
            .contract_for(&contact.node_id)
            .cloned()
            .ok_or(ProtocolError::Unauthorized)?;

        for leaf in &params.audit_tree {
            if hex::decode(leaf).map(|b| b.len() != 20).unwrap_or(true) {
                return Err(ProtocolError::InvalidFormat(format!(
                    "malformed audit leaf: {}",
                    leaf
                )));
            }
        }
        item.set_tree(contact.node_id, params.audit_tree);

        let now = Utc::now().timestamp_millis();
        if !(now < contract.store_end
            && now + self.config.consign_threshold_ms > contract.store_begin)
        {
            return Err(ProtocolError::Timing);
        }

        // Tree persists before the token is issued.
        self.manager
            .save(&item)
            .await
            .map_err(ProtocolError::SaveFailed)?;
        let token = self.authorizer.issue(params.data_hash).await;

        info!(hash = %params.data_hash, renter = %contact.node_id, "Consignment authorized");
        Ok(RpcReply::Consign(ConsignReply { token }))
    }

    /// MIRROR: replicate a shard from another farmer over an authorized
    /// data channel. The reply goes out as soon as the channel is
    /// established; the transfer itself proceeds in the background.
    async fn mirror(&self, contact: &Contact, params: MirrorParams) -> Result<RpcReply> {
        let item = self
            .manager
            .load(&params.data_hash)
            .await
            .map_err(ProtocolError::LoadFailed)?;

        if item.contract_for(&contact.node_id).is_none() {
            return Err(ProtocolError::NotContracted);
        }

        let sink = match item.shard {
            Shard::Present(_) => {
                debug!(hash = %params.data_hash, "Shard already mirrored");
                return Ok(RpcReply::Mirror(EmptyReply {}));
            }
            Shard::Empty(sink) => sink,
        };

        match self
            .channel_client
            .open_read_stream(&params.farmer, &params.token, &params.data_hash)
            .await
        {
            Ok(reader) => {
                info!(
                    hash = %params.data_hash,
                    source = %params.farmer.node_id,
                    "Mirror transfer started"
                );
                tokio::spawn(pipe_shard(reader, sink));
                Ok(RpcReply::Mirror(EmptyReply {}))
            }
            Err(e) => {
                sink.destroy().await;
                Err(ProtocolError::Channel(e.to_string()))
            }
        }
    }

    /// RETRIEVE: issue a download token for a contracted shard.
    async fn retrieve(&self, contact: &Contact, params: RetrieveParams) -> Result<RpcReply> {
        let hash = DataHash::from_hex(&params.data_hash)
            .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;

        let item = self
            .manager
            .load(&hash)
            .await
            .map_err(ProtocolError::LoadFailed)?;

        // Tokens are only issued to peers contracted for the shard.
        if item.contract_for(&contact.node_id).is_none() {
            return Err(ProtocolError::Unauthorized);
        }

        let token = self.authorizer.issue(item.hash).await;
        Ok(RpcReply::Retrieve(RetrieveReply { token }))
    }

    /// AUDIT: prove custody for a batch of challenges. Proofs are
    /// generated with bounded concurrency, output order matches input
    /// order, and the first failure fails the whole batch.
    async fn audit(&self, contact: &Contact, params: AuditParams) -> Result<RpcReply> {
        let queries: Vec<AuditQuery> = match &params.audits {
            Value::Array(_) => serde_json::from_value(params.audits.clone())
                .map_err(|_| ProtocolError::InvalidAudits)?,
            _ => return Err(ProtocolError::InvalidAudits),
        };

        let prover = &self.prover;
        let node_id = contact.node_id;
        let proof_futures = queries.into_iter().map(|query| async move {
            prover
                .prove(&query.data_hash, &query.challenge, &node_id)
                .await
        });

        let proofs: Vec<_> = stream::iter(proof_futures)
            .buffered(self.config.max_concurrent_audits.max(1))
            .try_collect()
            .await?;

        Ok(RpcReply::Audit(AuditReply { proofs }))
    }

    /// PROBE: check whether the sender is externally reachable.
    async fn probe(&self, contact: &Contact) -> Result<RpcReply> {
        self.transport
            .ping(contact)
            .await
            .map_err(|_| ProtocolError::NotAddressable)?;
        Ok(RpcReply::Probe(EmptyReply {}))
    }

    /// FIND_TUNNEL: answer with known tunnelers, relaying through
    /// nearest neighbors while the relay depth bound allows.
    async fn find_tunnel(&self, contact: &Contact, params: FindTunnelParams) -> Result<RpcReply> {
        let known = self.known_tunnelers().await;
        if !known.is_empty() {
            return Ok(RpcReply::FindTunnel(FindTunnelReply { tunnels: known }));
        }

        if params.relayers.len() < self.config.max_find_tunnel_relays {
            let mut relayers = params.relayers.clone();
            relayers.push(self.self_contact.clone());

            let mut exclude: Vec<NodeId> = relayers.iter().map(|c| c.node_id).collect();
            exclude.push(contact.node_id);

            let neighbors = self
                .router
                .nearest(&self.keypair.node_id(), self.broker.relay_breadth(), &exclude)
                .await;

            for neighbor in neighbors {
                let call = RpcCall::FindTunnel(FindTunnelParams {
                    relayers: relayers.clone(),
                });
                match self.transport.send(&neighbor, call).await {
                    Ok(RpcReply::FindTunnel(reply)) if !reply.tunnels.is_empty() => {
                        for tunneler in reply.tunnels.into_iter().take(self.broker.capacity()) {
                            self.broker.add(tunneler).await;
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(neighbor = %neighbor.node_id, error = %e, "Tunnel relay query failed");
                        continue;
                    }
                }
            }
        }

        Ok(RpcReply::FindTunnel(FindTunnelReply {
            tunnels: self.known_tunnelers().await,
        }))
    }

    /// Known tunnelers with self prepended when the local tunnel server
    /// has capacity.
    async fn known_tunnelers(&self) -> Vec<Contact> {
        let mut tunnels = self.broker.list().await;
        if self.tunnel_server.has_tunnel_available() {
            tunnels.insert(0, self.self_contact.clone());
        }
        tunnels.truncate(self.broker.capacity());
        tunnels
    }

    /// OPEN_TUNNEL: allocate a gateway and hand back its entrance.
    async fn open_tunnel(&self) -> Result<RpcReply> {
        let gateway = self
            .tunnel_server
            .create_gateway()
            .await
            .map_err(|e| ProtocolError::Gateway(e.to_string()))?;

        let tunnel = format!(
            "ws://{}:{}/tun?token={}",
            self.self_contact.address,
            self.tunnel_server.listen_port(),
            gateway.entrance_token
        );
        let alias = TunnelAlias {
            address: self.self_contact.address.clone(),
            port: gateway.entrance_port,
        };

        if self.transport.requires_traversal() {
            self.transport
                .create_port_mapping(gateway.entrance_port)
                .await
                .map_err(|e| ProtocolError::Mapping(e.to_string()))?;
        }

        info!(port = gateway.entrance_port, "Tunnel gateway opened");
        Ok(RpcReply::OpenTunnel(OpenTunnelReply { tunnel, alias }))
    }

    /// TRIGGER: delegate to the registered behavior for the sender.
    async fn trigger(&self, contact: &Contact, params: TriggerParams) -> Result<RpcReply> {
        self.triggers
            .process(contact, &params.0)
            .await
            .map(RpcReply::Trigger)
    }
}

/// Drain an authorized read stream into a writable shard slot. The slot
/// is destroyed on any stream or write failure, sealed on completion.
async fn pipe_shard(mut reader: Box<dyn AsyncRead + Send + Unpin>, sink: ShardSink) {
    let hash = sink.hash();
    let mut buf = [0u8; PIPE_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write(&buf[..n]).await {
                    warn!(hash = %hash, error = %e, "Mirror write failed");
                    sink.destroy().await;
                    return;
                }
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Mirror stream failed");
                sink.destroy().await;
                return;
            }
        }
    }
    match sink.commit().await {
        Ok(_) => info!(hash = %hash, "Mirrored shard committed"),
        Err(e) => warn!(hash = %hash, error = %e, "Mirror commit failed"),
    }
}
