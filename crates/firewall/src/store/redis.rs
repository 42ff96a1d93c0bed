//! Distributed token store backed by redis.
//!
//! Entries are keyed `{prefix}:{session}:{token_value}` with a per-key
//! TTL, so expiry is delegated to the backend and the sweep is a no-op.
//! The reverse index lives under
//! `{prefix}:rev:{session}:{pii_type}:{md5(original)}`.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{PiiToken, PiiType, TokenStore};
use crate::FirewallError;

/// Redis-backed token store.
pub struct RedisTokenStore {
    connection: redis::aio::ConnectionManager,
    prefix: String,
    key_ttl: Duration,
}

impl RedisTokenStore {
    /// Connect to the given redis URL.
    pub async fn connect(url: &str, prefix: impl Into<String>, key_ttl: Duration) -> crate::Result<Self> {
        let client = redis::Client::open(url).map_err(|e| FirewallError::Store(e.to_string()))?;

        let connection = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| FirewallError::Store(e.to_string()))?;

        Ok(Self {
            connection,
            prefix: prefix.into(),
            key_ttl,
        })
    }

    fn token_key(&self, session: &str, token_value: &str) -> String {
        format!("{}:{session}:{token_value}", self.prefix)
    }

    fn reverse_key(&self, session: &str, original: &str, pii_type: &PiiType) -> String {
        let digest = md5::compute(original.as_bytes());
        format!("{}:rev:{session}:{pii_type}:{digest:x}", self.prefix)
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn store(&self, session: &str, token: PiiToken) -> crate::Result<()> {
        let mut connection = self.connection.clone();
        let ttl = self.key_ttl.as_secs();

        let payload = serde_json::to_string(&token).map_err(|e| FirewallError::Store(e.to_string()))?;

        let token_key = self.token_key(session, &token.token_value);
        let reverse_key = self.reverse_key(session, &token.original_value, &token.pii_type);

        connection
            .set_ex::<_, _, ()>(token_key, payload, ttl)
            .await
            .map_err(|e| FirewallError::Store(e.to_string()))?;

        connection
            .set_ex::<_, _, ()>(reverse_key, token.token_value.clone(), ttl)
            .await
            .map_err(|e| FirewallError::Store(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, session: &str, token_value: &str) -> crate::Result<Option<String>> {
        let mut connection = self.connection.clone();

        let payload: Option<String> = connection
            .get(self.token_key(session, token_value))
            .await
            .map_err(|e| FirewallError::Store(e.to_string()))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let token: PiiToken = serde_json::from_str(&payload).map_err(|e| FirewallError::Store(e.to_string()))?;

        Ok(Some(token.original_value))
    }

    async fn reverse_lookup(&self, session: &str, original: &str, pii_type: &PiiType) -> crate::Result<Option<String>> {
        let mut connection = self.connection.clone();

        connection
            .get(self.reverse_key(session, original, pii_type))
            .await
            .map_err(|e| FirewallError::Store(e.to_string()))
    }

    async fn get_all(&self, session: &str) -> crate::Result<HashMap<String, PiiToken>> {
        let mut connection = self.connection.clone();

        let pattern = format!("{}:{session}:*", self.prefix);
        let keys: Vec<String> = connection
            .keys(pattern)
            .await
            .map_err(|e| FirewallError::Store(e.to_string()))?;

        let mut tokens = HashMap::with_capacity(keys.len());

        for key in keys {
            let payload: Option<String> = connection
                .get(&key)
                .await
                .map_err(|e| FirewallError::Store(e.to_string()))?;

            if let Some(payload) = payload {
                let token: PiiToken =
                    serde_json::from_str(&payload).map_err(|e| FirewallError::Store(e.to_string()))?;
                tokens.insert(token.token_value.clone(), token);
            }
        }

        Ok(tokens)
    }

    async fn delete(&self, session: &str) -> crate::Result<()> {
        let mut connection = self.connection.clone();

        for pattern in [
            format!("{}:{session}:*", self.prefix),
            format!("{}:rev:{session}:*", self.prefix),
        ] {
            let keys: Vec<String> = connection
                .keys(pattern)
                .await
                .map_err(|e| FirewallError::Store(e.to_string()))?;

            if !keys.is_empty() {
                connection
                    .del::<_, ()>(keys)
                    .await
                    .map_err(|e| FirewallError::Store(e.to_string()))?;
            }
        }

        Ok(())
    }

    async fn cleanup_expired(&self, _ttl: Duration) -> crate::Result<()> {
        // Per-key TTL; redis expires entries on its own.
        Ok(())
    }
}
