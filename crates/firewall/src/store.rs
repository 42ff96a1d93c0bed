//! PII token storage.
//!
//! Two interchangeable backends share the [`TokenStore`] trait: a
//! process-local map with a session TTL, and a redis-backed distributed
//! store with per-key TTL. Callers never hold store references across
//! request boundaries; the tokenizer owns the store handle.

mod memory;
mod redis;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

pub use memory::MemoryTokenStore;
pub use redis::RedisTokenStore;

/// The category of a detected PII value. Determines the shape of the
/// synthetic token minted for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PiiType {
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// US social security number.
    Ssn,
    /// Payment card number.
    CreditCard,
    /// IP address.
    IpAddress,
    /// Provider API key or similar secret.
    ApiKey,
    /// Person name.
    Person,
    /// Location name.
    Location,
    /// Anything else, carrying the detector's type string.
    Other(String),
}

impl PiiType {
    /// The canonical upper-case name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Ssn => "SSN",
            Self::CreditCard => "CREDIT_CARD",
            Self::IpAddress => "IP_ADDRESS",
            Self::ApiKey => "API_KEY",
            Self::Person => "PERSON",
            Self::Location => "LOCATION",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for PiiType {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "EMAIL" => Self::Email,
            "PHONE" => Self::Phone,
            "SSN" => Self::Ssn,
            "CREDIT_CARD" => Self::CreditCard,
            "IP_ADDRESS" => Self::IpAddress,
            "API_KEY" => Self::ApiKey,
            "PERSON" => Self::Person,
            "LOCATION" => Self::Location,
            _ => Self::Other(value.to_ascii_uppercase()),
        }
    }
}

impl From<&str> for PiiType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<PiiType> for String {
    fn from(value: PiiType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A minted PII token together with the original value it replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiToken {
    /// The detected original value.
    pub original_value: String,
    /// The synthetic replacement.
    pub token_value: String,
    /// Category of the original value.
    pub pii_type: PiiType,
    /// When the token was minted, UTC.
    pub detected_at: Timestamp,
}

/// Keyed token storage.
///
/// Uniqueness holds per `(session, token_value)`; the reverse index holds
/// per `(session, original_value, pii_type)` so tokenization stays
/// idempotent within a session.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Store a token under a session, overwriting any previous mapping for
    /// the same token value.
    async fn store(&self, session: &str, token: PiiToken) -> crate::Result<()>;

    /// Resolve a token value back to its original, if stored.
    async fn get(&self, session: &str, token_value: &str) -> crate::Result<Option<String>>;

    /// Look up an already-issued token for `(original, pii_type)`.
    async fn reverse_lookup(&self, session: &str, original: &str, pii_type: &PiiType) -> crate::Result<Option<String>>;

    /// Snapshot of every token in a session, keyed by token value. Callers
    /// may iterate without holding any lock.
    async fn get_all(&self, session: &str) -> crate::Result<HashMap<String, PiiToken>>;

    /// Remove an entire session.
    async fn delete(&self, session: &str) -> crate::Result<()>;

    /// Sweep all sessions, removing those where every token is older than
    /// `ttl`. Partially expired sessions are left alone so an in-flight
    /// conversation never loses half its mappings.
    async fn cleanup_expired(&self, ttl: Duration) -> crate::Result<()>;
}

/// Spawn the periodic cleanup sweep for a store.
///
/// The sweep runs at a quarter of the session TTL, matching the eager
/// on-access expiry of the in-memory backend.
pub fn spawn_cleanup(store: Arc<dyn TokenStore>, session_ttl: Duration) -> tokio::task::JoinHandle<()> {
    let interval = (session_ttl / 4).max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if let Err(e) = store.cleanup_expired(session_ttl).await {
                log::warn!("Token store cleanup sweep failed: {e}");
            }
        }
    })
}
