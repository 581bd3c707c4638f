//! One-shot token authorization for data-channel transfers.
//!
//! CONSIGN uploads and RETRIEVE/MIRROR downloads are gated by tokens
//! issued here: 256 bits of OS randomness bound to a data hash, consumed
//! by exactly one accept before they expire.

use crate::error::{ProtocolError, Result};
use crate::{CHANNEL_TOKEN_TTL_SECS, TOKEN_BYTES};
use rand::rngs::OsRng;
use rand::RngCore;
use silo_types::DataHash;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub token_ttl: Duration,
    pub token_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(CHANNEL_TOKEN_TTL_SECS),
            token_bytes: TOKEN_BYTES,
        }
    }
}

struct TokenRecord {
    data_hash: DataHash,
    expires_at: Instant,
}

/// Issues and consumes one-shot data-channel tokens.
#[derive(Clone)]
pub struct ChannelAuthorizer {
    config: ChannelConfig,
    tokens: Arc<RwLock<HashMap<String, TokenRecord>>>,
}

impl ChannelAuthorizer {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mint a fresh token bound to `data_hash`, valid for one accept.
    pub async fn issue(&self, data_hash: DataHash) -> String {
        let mut bytes = vec![0u8; self.config.token_bytes];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.tokens.write().await.insert(
            token.clone(),
            TokenRecord {
                data_hash,
                expires_at: Instant::now() + self.config.token_ttl,
            },
        );
        debug!(hash = %data_hash, "Channel token issued");
        token
    }

    /// Consume a token. Fails on unknown, expired, reused, or
    /// wrong-hash tokens; a token never authorizes twice.
    pub async fn accept(&self, token: &str, data_hash: &DataHash) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let record = tokens
            .remove(token)
            .ok_or_else(|| ProtocolError::Token("unknown or already used".to_string()))?;

        if record.expires_at <= Instant::now() {
            return Err(ProtocolError::Token("expired".to_string()));
        }
        if record.data_hash != *data_hash {
            return Err(ProtocolError::Token("bound to a different shard".to_string()));
        }
        Ok(())
    }

    /// Drop expired records, returning how many were reaped.
    pub async fn reap_expired(&self) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        let now = Instant::now();
        tokens.retain(|_, record| record.expires_at > now);
        before - tokens.len()
    }

    pub async fn outstanding(&self) -> usize {
        self.tokens.read().await.len()
    }
}

impl Default for ChannelAuthorizer {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}
