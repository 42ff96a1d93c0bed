//! Request authentication context shared between the server layers and the
//! LLM handlers.

mod identity;

pub use identity::{ApiKey, ApiKeyStore, MemoryApiKeyStore, User, key_hash, key_prefix};

/// Authentication state attached to a request after the auth layer has
/// resolved the bearer token.
#[derive(Debug, Clone)]
pub struct Authentication {
    /// The authenticated user.
    pub user_id: String,
    /// Tenant the user belongs to, when known.
    pub tenant_id: Option<String>,
    /// Identifier of the API key that authenticated the request.
    pub key_id: String,
}
