//! API key identity lookup.
//!
//! The gateway consumes the identity store purely as an authentication
//! lookup: resolve a bearer token to its key and user, nothing more. Keys
//! are indexed by the pair of the 12-character token prefix and the
//! SHA-256 digest of the full token, so the store never holds raw tokens.

use std::collections::HashMap;

use jiff::Timestamp;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};

/// Number of leading token characters kept as the indexable prefix,
/// including the literal `tok_`.
pub const KEY_PREFIX_LEN: usize = 12;

/// A stored API key.
#[derive(Debug, Clone)]
pub struct ApiKey {
    /// Stable key identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// First [`KEY_PREFIX_LEN`] characters of the token.
    pub key_prefix: String,
    /// SHA-256 digest of the full token, hex-encoded.
    pub key_hash: String,
    /// Expiry; `None` means the key never expires.
    pub expires_at: Option<Timestamp>,
}

impl ApiKey {
    /// Whether the key has expired at the given instant.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A stored user.
#[derive(Debug, Clone)]
pub struct User {
    /// Stable user identifier.
    pub id: String,
    /// Tenant the user belongs to, when known.
    pub tenant_id: Option<String>,
}

/// Authentication lookup over the identity store.
pub trait ApiKeyStore: Send + Sync {
    /// Resolve a full bearer token to its key and user, or `None` when the
    /// token is unknown.
    fn lookup_api_key(&self, token: &str) -> Option<(ApiKey, User)>;
}

/// The indexable prefix of a token.
pub fn key_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(KEY_PREFIX_LEN)
        .map(|(i, _)| i)
        .unwrap_or(token.len());

    &token[..end]
}

/// Hex-encoded SHA-256 digest of the full token.
pub fn key_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

/// In-process identity store seeded from the configuration.
#[derive(Debug, Default)]
pub struct MemoryApiKeyStore {
    keys: HashMap<(String, String), (ApiKey, User)>,
}

impl MemoryApiKeyStore {
    /// Build a store from the configured static keys.
    pub fn from_config(auth: &config::AuthConfig) -> Self {
        let mut store = Self::default();

        for (index, key) in auth.keys.iter().enumerate() {
            store.insert(
                key.token.expose_secret(),
                format!("key-{index}"),
                key.user_id.clone(),
                key.tenant_id.clone(),
                key.expires_at,
            );
        }

        store
    }

    /// Register a token with its owning user.
    pub fn insert(
        &mut self,
        token: &str,
        key_id: String,
        user_id: String,
        tenant_id: Option<String>,
        expires_at: Option<Timestamp>,
    ) {
        let prefix = key_prefix(token).to_string();
        let hash = key_hash(token);

        let key = ApiKey {
            id: key_id,
            user_id: user_id.clone(),
            key_prefix: prefix.clone(),
            key_hash: hash.clone(),
            expires_at,
        };

        let user = User {
            id: user_id,
            tenant_id,
        };

        self.keys.insert((prefix, hash), (key, user));
    }
}

impl ApiKeyStore for MemoryApiKeyStore {
    fn lookup_api_key(&self, token: &str) -> Option<(ApiKey, User)> {
        let index = (key_prefix(token).to_string(), key_hash(token));
        self.keys.get(&index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(token: &str, expires_at: Option<Timestamp>) -> MemoryApiKeyStore {
        let mut store = MemoryApiKeyStore::default();
        store.insert(token, "key-1".to_string(), "user-1".to_string(), None, expires_at);
        store
    }

    #[test]
    fn prefix_is_twelve_characters_including_the_literal() {
        assert_eq!(key_prefix("tok_abcdefgh12345678"), "tok_abcdefgh");
    }

    #[test]
    fn lookup_resolves_by_prefix_and_hash() {
        let store = store_with("tok_abcdefgh12345678", None);

        let (key, user) = store.lookup_api_key("tok_abcdefgh12345678").unwrap();
        assert_eq!(key.key_prefix, "tok_abcdefgh");
        assert_eq!(user.id, "user-1");
    }

    #[test]
    fn lookup_rejects_a_token_sharing_only_the_prefix() {
        let store = store_with("tok_abcdefgh12345678", None);

        assert!(store.lookup_api_key("tok_abcdefgh87654321").is_none());
    }

    #[test]
    fn expiry_is_reported() {
        let past = Timestamp::from_second(1_000_000).unwrap();
        let store = store_with("tok_abcdefgh12345678", Some(past));

        let (key, _) = store.lookup_api_key("tok_abcdefgh12345678").unwrap();
        assert!(key.is_expired(Timestamp::now()));
    }
}
