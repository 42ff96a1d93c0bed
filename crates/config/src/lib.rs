//! Tokligence Gateway configuration structures mapping the gateway TOML file.

#![deny(missing_docs)]

mod auth;
mod firewall;
mod llm;
mod loader;
mod server;

use std::path::Path;

pub use auth::{ApiKeyConfig, AuthConfig};
pub use firewall::{
    ExternalFilterConfig, FirewallConfig, FirewallMode, OnErrorPolicy, RegexFilterConfig, SseBufferConfig,
    TokenStoreBackend,
};
pub use llm::{LlmConfig, LlmProtocolsConfig, ProviderConfig, ProviderType};
use serde::Deserialize;
pub use server::ServerConfig;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// API key authentication settings.
    pub auth: AuthConfig,
    /// LLM provider and protocol settings.
    pub llm: LlmConfig,
    /// Content firewall settings.
    pub firewall: FirewallConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }
}
