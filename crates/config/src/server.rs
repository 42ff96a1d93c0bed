//! HTTP server configuration settings.

use std::net::SocketAddr;

use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Whether the unauthenticated health endpoint is exposed.
    pub health_enabled: bool,
    /// Path of the health endpoint.
    pub health_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            health_enabled: true,
            health_path: "/health".to_string(),
        }
    }
}
