//! Process-local token store.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use super::{PiiToken, PiiType, TokenStore};

struct StoredToken {
    token: PiiToken,
    stored_at: Instant,
}

#[derive(Default)]
struct SessionTokens {
    /// token_value -> stored token
    by_token: HashMap<String, StoredToken>,
    /// (original_value, pii_type) -> token_value
    by_original: HashMap<(String, String), String>,
}

impl SessionTokens {
    fn is_expired(&self, ttl: Duration) -> bool {
        !self.by_token.is_empty() && self.by_token.values().all(|stored| stored.stored_at.elapsed() > ttl)
    }
}

/// In-memory token store.
///
/// A single reader/writer lock covers the session map; every hold is O(1)
/// in the number of tokens touched, so concurrent requests on disjoint
/// sessions do not serialize on reads. Expired sessions are dropped
/// eagerly on access and by the periodic sweep.
pub struct MemoryTokenStore {
    sessions: RwLock<HashMap<String, SessionTokens>>,
    session_ttl: Duration,
}

impl MemoryTokenStore {
    /// Create a store with the given session TTL used for eager expiry.
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
        }
    }

    /// Drop the session if every token in it has outlived the TTL.
    /// Returns true when the session was removed or absent.
    fn evict_if_expired(&self, session: &str) -> bool {
        let needs_eviction = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());

            match sessions.get(session) {
                Some(tokens) => tokens.is_expired(self.session_ttl),
                None => return true,
            }
        };

        if needs_eviction {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

            // Re-check under the write lock; a store may have raced in.
            if sessions.get(session).is_some_and(|t| t.is_expired(self.session_ttl)) {
                sessions.remove(session);
                return true;
            }
        }

        false
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store(&self, session: &str, token: PiiToken) -> crate::Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let tokens = sessions.entry(session.to_string()).or_default();

        tokens.by_original.insert(
            (token.original_value.clone(), token.pii_type.as_str().to_string()),
            token.token_value.clone(),
        );

        tokens.by_token.insert(
            token.token_value.clone(),
            StoredToken {
                token,
                stored_at: Instant::now(),
            },
        );

        Ok(())
    }

    async fn get(&self, session: &str, token_value: &str) -> crate::Result<Option<String>> {
        if self.evict_if_expired(session) {
            return Ok(None);
        }

        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());

        Ok(sessions
            .get(session)
            .and_then(|tokens| tokens.by_token.get(token_value))
            .map(|stored| stored.token.original_value.clone()))
    }

    async fn reverse_lookup(&self, session: &str, original: &str, pii_type: &PiiType) -> crate::Result<Option<String>> {
        if self.evict_if_expired(session) {
            return Ok(None);
        }

        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());

        Ok(sessions
            .get(session)
            .and_then(|tokens| {
                tokens
                    .by_original
                    .get(&(original.to_string(), pii_type.as_str().to_string()))
            })
            .cloned())
    }

    async fn get_all(&self, session: &str) -> crate::Result<HashMap<String, PiiToken>> {
        if self.evict_if_expired(session) {
            return Ok(HashMap::new());
        }

        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());

        Ok(sessions
            .get(session)
            .map(|tokens| {
                tokens
                    .by_token
                    .iter()
                    .map(|(token_value, stored)| (token_value.clone(), stored.token.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, session: &str) -> crate::Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session);

        Ok(())
    }

    async fn cleanup_expired(&self, ttl: Duration) -> crate::Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, tokens| !tokens.is_expired(ttl));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;

    fn token(original: &str, value: &str, pii_type: PiiType) -> PiiToken {
        PiiToken {
            original_value: original.to_string(),
            token_value: value.to_string(),
            pii_type,
            detected_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn stores_and_resolves_tokens_per_session() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));

        store
            .store("session-a", token("alice@example.com", "user_ab12cd3@redacted.local", PiiType::Email))
            .await
            .unwrap();

        let original = store.get("session-a", "user_ab12cd3@redacted.local").await.unwrap();
        assert_eq!(original.as_deref(), Some("alice@example.com"));

        // Same token value in another session resolves to nothing.
        let other = store.get("session-b", "user_ab12cd3@redacted.local").await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn store_overwrites_on_token_value() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));

        store
            .store("s", token("first@example.com", "user_1111111@redacted.local", PiiType::Email))
            .await
            .unwrap();
        store
            .store("s", token("second@example.com", "user_1111111@redacted.local", PiiType::Email))
            .await
            .unwrap();

        let original = store.get("s", "user_1111111@redacted.local").await.unwrap();
        assert_eq!(original.as_deref(), Some("second@example.com"));
    }

    #[tokio::test]
    async fn reverse_lookup_finds_issued_tokens() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));

        store
            .store("s", token("123-45-6789", "XXX-XX-ab12", PiiType::Ssn))
            .await
            .unwrap();

        let found = store.reverse_lookup("s", "123-45-6789", &PiiType::Ssn).await.unwrap();
        assert_eq!(found.as_deref(), Some("XXX-XX-ab12"));

        // Same original under a different type is a different identity.
        let miss = store.reverse_lookup("s", "123-45-6789", &PiiType::Phone).await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn get_all_returns_a_snapshot() {
        let store = MemoryTokenStore::new(Duration::from_secs(60));

        store
            .store("s", token("a@example.com", "user_aaaaaaa@redacted.local", PiiType::Email))
            .await
            .unwrap();
        store.store("s", token("10.1.2.3", "10.0.ab.ab", PiiType::IpAddress)).await.unwrap();

        let snapshot = store.get_all("s").await.unwrap();
        assert_eq!(snapshot.len(), 2);

        // Mutating the store afterwards does not affect the snapshot.
        store.delete("s").await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_removes_only_fully_expired_sessions() {
        let store = MemoryTokenStore::new(Duration::from_millis(10));

        store
            .store("old", token("a@example.com", "user_aaaaaaa@redacted.local", PiiType::Email))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        // One fresh token keeps the mixed session alive.
        store
            .store("mixed", token("b@example.com", "user_bbbbbbb@redacted.local", PiiType::Email))
            .await
            .unwrap();

        store.cleanup_expired(Duration::from_millis(10)).await.unwrap();

        assert!(store.get_all("old").await.unwrap().is_empty());
        assert_eq!(store.get_all("mixed").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped_on_access() {
        let store = MemoryTokenStore::new(Duration::from_millis(10));

        store
            .store("s", token("a@example.com", "user_aaaaaaa@redacted.local", PiiType::Email))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("s", "user_aaaaaaa@redacted.local").await.unwrap().is_none());
    }
}
