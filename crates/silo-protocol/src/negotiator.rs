//! Outbound contract acquisition for farmer nodes.
//!
//! Subscribes to contract publications on the overlay, gates them
//! through an admission predicate and a concurrency limit, signs the
//! farmer half, and runs the OFFER exchange with the renter. Offers are
//! one-shot: any failure removes the contract from the pending list and
//! abandons the negotiation.

use crate::error::{ProtocolError, Result};
use crate::messages::{OfferParams, RpcCall, RpcReply};
use crate::net::{RoutingTable, Transport};
use serde_json::Value;
use silo_storage::{StorageEvent, StorageItem, StorageManager};
use silo_types::{Contact, Contract, ContractParty, DataHash, KeyPair, NodeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Admission predicate over published contracts. Pricing and policy
/// live behind this closure; the negotiator only enforces capacity and
/// concurrency.
pub type OfferPredicate = Arc<dyn Fn(&Contract) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct NegotiatorConfig {
    /// Maximum outstanding offers.
    pub concurrency: u32,
    /// Payment destination for accepted contracts; the farmer's own
    /// wallet address when unset.
    pub payment_address: Option<String>,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            payment_address: None,
        }
    }
}

pub struct FarmerNegotiator {
    keypair: KeyPair,
    manager: Arc<StorageManager>,
    router: Arc<dyn RoutingTable>,
    transport: Arc<dyn Transport>,
    predicate: OfferPredicate,
    pending_offers: Mutex<Vec<Contract>>,
    has_free_space: AtomicBool,
    config: NegotiatorConfig,
}

impl FarmerNegotiator {
    pub fn new(
        keypair: KeyPair,
        manager: Arc<StorageManager>,
        router: Arc<dyn RoutingTable>,
        transport: Arc<dyn Transport>,
        config: NegotiatorConfig,
    ) -> Self {
        Self {
            keypair,
            manager,
            router,
            transport,
            predicate: Arc::new(|_| true),
            pending_offers: Mutex::new(Vec::new()),
            has_free_space: AtomicBool::new(true),
            config,
        }
    }

    pub fn with_predicate(mut self, predicate: OfferPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Track the storage manager's capacity events: `Unlocked` reopens
    /// admission, `Locked` closes it, errors only get logged.
    pub fn spawn_capacity_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let negotiator = Arc::clone(self);
        let mut events = negotiator.manager.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(StorageEvent::Unlocked) => {
                        negotiator.has_free_space.store(true, Ordering::SeqCst);
                    }
                    Ok(StorageEvent::Locked) => {
                        negotiator.has_free_space.store(false, Ordering::SeqCst);
                    }
                    Ok(StorageEvent::Error(reason)) => {
                        warn!(reason = %reason, "Storage error event");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Capacity watcher lagged behind storage events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Entry point for contracts published to the overlay.
    pub async fn handle_publication(&self, published: &Value) {
        let contract = match Contract::from_json(published) {
            Ok(contract) => contract,
            Err(e) => {
                debug!(error = %e, "Dropping malformed contract publication");
                return;
            }
        };
        let renter_id = match contract.renter_id {
            Some(renter_id) => renter_id,
            None => {
                debug!("Dropping publication without a renter id");
                return;
            }
        };
        let hash = contract.data_hash;

        if !self.should_send_offer(&contract).await {
            debug!(hash = %hash, "Publication did not pass offer admission");
            return;
        }

        if !self.admit_pending(&contract).await {
            debug!(hash = %hash, "Offer already outstanding for this hash");
            return;
        }

        let renter = match self.resolve_renter(&renter_id).await {
            Some(renter) => renter,
            None => {
                warn!(hash = %hash, renter = %renter_id, "Could not locate renter");
                self.remove_pending(&hash).await;
                return;
            }
        };

        let contract = match self.sign_and_stage(contract, renter_id).await {
            Ok(contract) => contract,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Failed to stage offered contract");
                self.remove_pending(&hash).await;
                return;
            }
        };

        self.send_offer(&renter, contract).await;
    }

    /// Admit a contract to the pending list with duplicate suppression:
    /// at most one outstanding offer per data hash.
    pub async fn admit_pending(&self, contract: &Contract) -> bool {
        let mut pending = self.pending_offers.lock().await;
        if pending.iter().any(|c| c.data_hash == contract.data_hash) {
            return false;
        }
        pending.push(contract.clone());
        true
    }

    /// Admission gate: free space, size probe, concurrency, predicate.
    async fn should_send_offer(&self, contract: &Contract) -> bool {
        if !self.has_free_space.load(Ordering::SeqCst) {
            return false;
        }
        // A failing size probe is treated as a full disk.
        if self.manager.used_space().await.is_err() {
            return false;
        }
        if self.pending_offers.lock().await.len() >= self.config.concurrency as usize {
            return false;
        }
        (self.predicate)(contract)
    }

    /// Locate the renter locally, falling back to a DHT lookup.
    async fn resolve_renter(&self, renter_id: &NodeId) -> Option<Contact> {
        if let Some(contact) = self.router.get_contact(renter_id).await {
            return Some(contact);
        }
        match self.router.find_node(renter_id).await {
            Ok(contacts) => contacts.into_iter().next(),
            Err(e) => {
                debug!(renter = %renter_id, error = %e, "FIND_NODE lookup failed");
                None
            }
        }
    }

    /// Countersign the farmer half and persist the skeleton item that
    /// will receive the shard on consignment.
    async fn sign_and_stage(&self, mut contract: Contract, renter_id: NodeId) -> Result<Contract> {
        contract.payment_destination = Some(
            self.config
                .payment_address
                .clone()
                .unwrap_or_else(|| self.keypair.address()),
        );
        contract.sign(ContractParty::Farmer, &self.keypair)?;

        let mut item = StorageItem::new(self.manager.shards().open(contract.data_hash).await);
        item.add_contract(renter_id, contract.clone())
            .map_err(ProtocolError::SaveFailed)?;
        self.manager
            .save(&item)
            .await
            .map_err(ProtocolError::SaveFailed)?;
        Ok(contract)
    }

    /// Run the OFFER exchange. Whatever the outcome, the contract's
    /// pending slot is released when the response is in.
    async fn send_offer(&self, renter: &Contact, contract: Contract) {
        let hash = contract.data_hash;
        let call = match contract.to_json() {
            Ok(json) => RpcCall::Offer(OfferParams { contract: json }),
            Err(e) => {
                warn!(hash = %hash, error = %e, "Could not serialize offered contract");
                self.remove_pending(&hash).await;
                return;
            }
        };

        let response = self.transport.send(renter, call).await;
        match response {
            Ok(RpcReply::Offer(reply)) => match reply.contract {
                Some(returned) => self.process_offer_response(&contract, &returned).await,
                None => {
                    info!(hash = %hash, renter = %renter.node_id, "Renter refused to sign");
                }
            },
            Ok(_) => {
                warn!(hash = %hash, "Unexpected reply to offer");
            }
            Err(e) => {
                warn!(hash = %hash, error = %e, "Offer transport failed");
            }
        }
        self.remove_pending(&hash).await;
    }

    /// Validate the completed contract the renter sent back and install
    /// it; the farmer then awaits CONSIGN.
    async fn process_offer_response(&self, offered: &Contract, returned: &Value) {
        let hash = offered.data_hash;
        let completed = match Contract::from_json(returned) {
            Ok(completed) => completed,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Returned contract did not parse");
                return;
            }
        };

        let renter_id = match offered.renter_id {
            Some(renter_id) => renter_id,
            None => return,
        };
        if !completed.verify(ContractParty::Renter, &renter_id) {
            warn!(hash = %hash, renter = %renter_id, "Returned contract has an invalid renter signature");
            return;
        }

        let mut item = StorageItem::new(self.manager.shards().open(hash).await);
        if item.add_contract(renter_id, completed).is_err() {
            warn!(hash = %hash, "Returned contract is for a different shard");
            return;
        }
        if let Err(e) = self.manager.save(&item).await {
            warn!(hash = %hash, error = %e, "Failed to persist completed contract");
            return;
        }
        info!(hash = %hash, renter = %renter_id, "Contract completed, awaiting consignment");
    }

    async fn remove_pending(&self, hash: &DataHash) {
        self.pending_offers
            .lock()
            .await
            .retain(|c| c.data_hash != *hash);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending_offers.lock().await.len()
    }

    pub fn has_free_space(&self) -> bool {
        self.has_free_space.load(Ordering::SeqCst)
    }
}
