//! API key authentication settings.

use jiff::Timestamp;
use secrecy::SecretString;
use serde::Deserialize;

/// API key authentication settings.
///
/// Keys configured here seed the in-process identity store on boot. The
/// full token value never leaves this structure; the store keeps only the
/// 12-character prefix and the SHA-256 digest.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Static API keys accepted by the gateway.
    pub keys: Vec<ApiKeyConfig>,
}

/// A single configured API key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    /// The full bearer token. Must start with `tok_`.
    pub token: SecretString,
    /// The user this key authenticates as.
    pub user_id: String,
    /// Optional tenant the user belongs to.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Key expiry. Expired keys are rejected at the auth layer.
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}
