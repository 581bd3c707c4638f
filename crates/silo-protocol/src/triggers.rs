//! Pluggable TRIGGER delegation.
//!
//! Trigger behaviors are registered against an originating node id (hex)
//! or the `"*"` wildcard; the TRIGGER handler looks up the sender and
//! hands over the opaque payload.

use crate::error::{ProtocolError, Result};
use async_trait::async_trait;
use serde_json::Value;
use silo_types::Contact;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const WILDCARD: &str = "*";

#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn process(&self, contact: &Contact, params: &Value) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct TriggerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TriggerHandler>>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior for a source node id (hex) or `"*"`.
    pub async fn register(&self, source: impl Into<String>, handler: Arc<dyn TriggerHandler>) {
        self.handlers.write().await.insert(source.into(), handler);
    }

    pub async fn deregister(&self, source: &str) -> bool {
        self.handlers.write().await.remove(source).is_some()
    }

    /// Dispatch a trigger from `contact`: exact node id match first,
    /// wildcard second.
    pub async fn process(&self, contact: &Contact, params: &Value) -> Result<Value> {
        let handlers = self.handlers.read().await;
        let handler = handlers
            .get(&contact.node_id.to_hex())
            .or_else(|| handlers.get(WILDCARD))
            .cloned();
        drop(handlers);

        match handler {
            Some(handler) => handler.process(contact, params).await,
            None => Err(ProtocolError::NoTrigger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_types::NodeId;

    struct Echo;

    #[async_trait]
    impl TriggerHandler for Echo {
        async fn process(&self, _contact: &Contact, params: &Value) -> Result<Value> {
            Ok(params.clone())
        }
    }

    fn contact(seed: u8) -> Contact {
        Contact::new(NodeId::from_bytes([seed; 20]), "10.0.0.1", 4000)
    }

    #[tokio::test]
    async fn test_exact_match_preferred() {
        let registry = TriggerRegistry::new();
        let known = contact(1);
        registry.register(known.node_id.to_hex(), Arc::new(Echo)).await;

        let payload = serde_json::json!({ "behavior": "restart" });
        let result = registry.process(&known, &payload).await.unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_wildcard_fallback() {
        let registry = TriggerRegistry::new();
        registry.register(WILDCARD, Arc::new(Echo)).await;
        assert!(registry
            .process(&contact(9), &Value::Null)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_source_rejected() {
        let registry = TriggerRegistry::new();
        let result = registry.process(&contact(9), &Value::Null).await;
        assert!(matches!(result, Err(ProtocolError::NoTrigger)));
    }
}
