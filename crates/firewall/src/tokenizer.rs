//! Synthetic token minting and reversal.

use std::sync::{Arc, Mutex};

use jiff::Timestamp;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::store::{PiiToken, PiiType, TokenStore};

/// Generates type-shaped synthetic replacements for PII values and
/// orchestrates the token store.
///
/// Tokenization is idempotent per `(session, type, value)`: repeated calls
/// return the previously issued token. When the store fails transiently a
/// fresh token is emitted anyway; detokenization will then pass the token
/// through verbatim, which is degraded but never leaks the original.
pub struct Tokenizer {
    store: Arc<dyn TokenStore>,
    // Serialized so tokens stay collision-free under heavy concurrency.
    rng: Mutex<StdRng>,
}

impl Tokenizer {
    /// Create a tokenizer over the given store.
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// The store this tokenizer writes to.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Replace `original` with a synthetic token, reusing the token issued
    /// earlier for the same `(session, type, value)` triple when possible.
    pub async fn tokenize(&self, session: &str, pii_type: &PiiType, original: &str) -> String {
        match self.store.reverse_lookup(session, original, pii_type).await {
            Ok(Some(existing)) => return existing,
            Ok(None) => {}
            Err(e) => {
                // Transient lookup failure: mint a fresh token rather than
                // failing the request. Strict deduplication is not
                // guaranteed across storage failures.
                log::warn!("Token reverse lookup failed, minting fresh token: {e}");
            }
        }

        let token_value = self.mint(pii_type, original);

        let token = PiiToken {
            original_value: original.to_string(),
            token_value: token_value.clone(),
            pii_type: pii_type.clone(),
            detected_at: Timestamp::now(),
        };

        if let Err(e) = self.store.store(session, token).await {
            log::warn!("Failed to store PII token, detokenization will miss it: {e}");
        }

        token_value
    }

    /// Record a mapping produced by an external detector verbatim.
    pub async fn store_external_token(&self, session: &str, pii_type: &PiiType, original: &str, token_value: &str) {
        let token = PiiToken {
            original_value: original.to_string(),
            token_value: token_value.to_string(),
            pii_type: pii_type.clone(),
            detected_at: Timestamp::now(),
        };

        if let Err(e) = self.store.store(session, token).await {
            log::warn!("Failed to store external PII token: {e}");
        }
    }

    /// Resolve a token back to its original value.
    pub async fn detokenize(&self, session: &str, token_value: &str) -> Option<String> {
        match self.store.get(session, token_value).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Token lookup failed during detokenization: {e}");
                None
            }
        }
    }

    /// Replace every stored token occurring in `text`, in one pass over
    /// the session's token map.
    pub async fn detokenize_all(&self, session: &str, text: &str) -> String {
        let tokens = match self.store.get_all(session).await {
            Ok(tokens) => tokens,
            Err(e) => {
                log::warn!("Token snapshot failed during detokenization: {e}");
                return text.to_string();
            }
        };

        if tokens.is_empty() {
            return text.to_string();
        }

        let mut result = text.to_string();

        for (token_value, token) in &tokens {
            if result.contains(token_value.as_str()) {
                result = result.replace(token_value.as_str(), &token.original_value);
            }
        }

        result
    }

    /// Build a type-shaped token for the original value.
    ///
    /// The hex digits come from `md5(original ‖ unix_nanos ‖ rand)`, with
    /// the randomness folded in so equal values in different sessions get
    /// different tokens.
    fn mint(&self, pii_type: &PiiType, original: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        let salt = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.random::<u64>() >> 1
        };

        let digest = md5::compute(format!("{original}{nanos}{salt}").as_bytes());
        let hex = format!("{digest:x}");

        match pii_type {
            PiiType::Email => format!("user_{}@redacted.local", &hex[..7]),
            PiiType::Phone => format!("+1-555-{}-{}", &hex[..3], &hex[..4]),
            PiiType::Ssn => format!("XXX-XX-{}", &hex[..4]),
            PiiType::CreditCard => format!("XXXX-XXXX-XXXX-{}", &hex[..4]),
            PiiType::IpAddress => format!("10.0.{}.{}", &hex[..2], &hex[..2]),
            PiiType::ApiKey => format!("sk-redacted-{}", &hex[..7]),
            PiiType::Person | PiiType::Location => {
                format!("{}_{}", pii_type.as_str(), hex[..6].to_uppercase())
            }
            PiiType::Other(_) => format!("[REDACTED_{}]", &hex[..7]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryTokenStore;

    fn tokenizer() -> Tokenizer {
        Tokenizer::new(Arc::new(MemoryTokenStore::new(Duration::from_secs(60))))
    }

    #[tokio::test]
    async fn tokenize_is_idempotent_per_session() {
        let tokenizer = tokenizer();

        let first = tokenizer.tokenize("s", &PiiType::Email, "alice@example.com").await;
        let second = tokenizer.tokenize("s", &PiiType::Email, "alice@example.com").await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn tokenize_round_trips() {
        let tokenizer = tokenizer();

        let token = tokenizer.tokenize("s", &PiiType::Ssn, "123-45-6789").await;
        let original = tokenizer.detokenize("s", &token).await;

        assert_eq!(original.as_deref(), Some("123-45-6789"));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let tokenizer = tokenizer();

        let token_a = tokenizer.tokenize("session-a", &PiiType::Email, "alice@example.com").await;
        let token_b = tokenizer.tokenize("session-b", &PiiType::Email, "alice@example.com").await;

        // Randomness is folded into the digest, so equal values in
        // different sessions mint different tokens.
        assert_ne!(token_a, token_b);

        // And a token minted in one session does not resolve in another.
        assert!(tokenizer.detokenize("session-b", &token_a).await.is_none());
    }

    #[tokio::test]
    async fn token_shapes_match_their_type() {
        let tokenizer = tokenizer();

        let email = tokenizer.tokenize("s", &PiiType::Email, "a@example.com").await;
        assert!(regex::Regex::new(r"^user_[0-9a-f]{7}@redacted\.local$").unwrap().is_match(&email));

        let phone = tokenizer.tokenize("s", &PiiType::Phone, "+1-202-555-0143").await;
        assert!(regex::Regex::new(r"^\+1-555-[0-9a-f]{3}-[0-9a-f]{4}$").unwrap().is_match(&phone));

        let ssn = tokenizer.tokenize("s", &PiiType::Ssn, "123-45-6789").await;
        assert!(regex::Regex::new(r"^XXX-XX-[0-9a-f]{4}$").unwrap().is_match(&ssn));

        let card = tokenizer.tokenize("s", &PiiType::CreditCard, "4111 1111 1111 1111").await;
        assert!(regex::Regex::new(r"^XXXX-XXXX-XXXX-[0-9a-f]{4}$").unwrap().is_match(&card));

        let ip = tokenizer.tokenize("s", &PiiType::IpAddress, "192.168.1.10").await;
        assert!(regex::Regex::new(r"^10\.0\.[0-9a-f]{2}\.[0-9a-f]{2}$").unwrap().is_match(&ip));

        let key = tokenizer.tokenize("s", &PiiType::ApiKey, "sk-live-1234").await;
        assert!(regex::Regex::new(r"^sk-redacted-[0-9a-f]{7}$").unwrap().is_match(&key));

        let person = tokenizer.tokenize("s", &PiiType::Person, "张三").await;
        assert!(regex::Regex::new(r"^PERSON_[0-9A-F]{6}$").unwrap().is_match(&person));

        let other = tokenizer.tokenize("s", &PiiType::Other("IBAN".to_string()), "DE44...").await;
        assert!(regex::Regex::new(r"^\[REDACTED_[0-9a-f]{7}\]$").unwrap().is_match(&other));
    }

    #[tokio::test]
    async fn external_tokens_are_recorded_verbatim() {
        let tokenizer = tokenizer();

        tokenizer
            .store_external_token("s", &PiiType::Email, "test@example.com", "[EMAIL_abc123]")
            .await;

        let original = tokenizer.detokenize("s", "[EMAIL_abc123]").await;
        assert_eq!(original.as_deref(), Some("test@example.com"));
    }

    #[tokio::test]
    async fn detokenize_all_replaces_every_stored_token() {
        let tokenizer = tokenizer();

        let email = tokenizer.tokenize("s", &PiiType::Email, "alice@example.com").await;
        let ssn = tokenizer.tokenize("s", &PiiType::Ssn, "123-45-6789").await;

        let text = format!("Contact {email} about case {ssn}, then {email} again.");
        let restored = tokenizer.detokenize_all("s", &text).await;

        assert_eq!(
            restored,
            "Contact alice@example.com about case 123-45-6789, then alice@example.com again."
        );
    }

    struct FailingStore;

    #[async_trait]
    impl crate::store::TokenStore for FailingStore {
        async fn store(&self, _: &str, _: PiiToken) -> crate::Result<()> {
            Err(crate::FirewallError::Store("down".to_string()))
        }

        async fn get(&self, _: &str, _: &str) -> crate::Result<Option<String>> {
            Err(crate::FirewallError::Store("down".to_string()))
        }

        async fn reverse_lookup(&self, _: &str, _: &str, _: &PiiType) -> crate::Result<Option<String>> {
            Err(crate::FirewallError::Store("down".to_string()))
        }

        async fn get_all(&self, _: &str) -> crate::Result<HashMap<String, PiiToken>> {
            Err(crate::FirewallError::Store("down".to_string()))
        }

        async fn delete(&self, _: &str) -> crate::Result<()> {
            Err(crate::FirewallError::Store("down".to_string()))
        }

        async fn cleanup_expired(&self, _: Duration) -> crate::Result<()> {
            Err(crate::FirewallError::Store("down".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failures_still_yield_a_token() {
        let tokenizer = Tokenizer::new(Arc::new(FailingStore));

        let token = tokenizer.tokenize("s", &PiiType::Email, "alice@example.com").await;
        assert!(token.ends_with("@redacted.local"));

        // Degraded but safe: the unrecorded token passes through verbatim.
        assert!(tokenizer.detokenize("s", &token).await.is_none());
        assert_eq!(tokenizer.detokenize_all("s", &token).await, token);
    }
}
