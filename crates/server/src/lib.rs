//! Tokligence Gateway server library.
//!
//! Provides a reusable serve function used by the binary and by
//! integration tests.

#![deny(missing_docs)]

mod auth;
mod logger;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{Json, Router, middleware, routing::get};
use config::Config;
use context::MemoryApiKeyStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The parsed gateway TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string, e.g. `info` or `server=debug,llm=debug`.
    pub log_filter: String,
    /// Version string logged on startup.
    pub version: String,
    /// Optional sender receiving the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Start and run the gateway with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("Tokligence Gateway {version}");

    let key_store = Arc::new(MemoryApiKeyStore::from_config(&config.auth));

    if config.auth.keys.is_empty() {
        log::warn!("No API keys configured; every request will be rejected at the auth layer");
    }

    let gateway_routes = llm::router(&config)
        .await
        .map_err(|e| anyhow!("Failed to initialize gateway router: {e}"))?
        .layer(middleware::from_fn_with_state(key_store, auth::authenticate));

    let mut app = Router::new().merge(gateway_routes);

    // The health endpoint stays outside the auth layer.
    if config.server.health_enabled {
        app = app.route(&config.server.health_path, get(health));
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let bound_address = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender
        && sender.send(bound_address).is_err()
    {
        log::warn!("Bound address receiver dropped before startup completed");
    }

    if config.llm.protocols.openai_enabled {
        log::info!("OpenAI-compatible endpoint: http://{bound_address}/v1/chat/completions");
    }

    if config.llm.protocols.anthropic_enabled {
        log::info!("Anthropic-compatible endpoint: http://{bound_address}/v1/messages");
    }

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow!("Failed to run HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    async fn spawn_server(config_toml: &str) -> SocketAddr {
        let config: Config = toml::from_str(config_toml).unwrap();
        let (sender, receiver) = tokio::sync::oneshot::channel();

        tokio::spawn(serve(ServeConfig {
            listen_address: "127.0.0.1:0".parse().unwrap(),
            config,
            shutdown_signal: CancellationToken::new(),
            log_filter: "error".to_string(),
            version: "test".to_string(),
            bound_addr_sender: Some(sender),
        }));

        receiver.await.unwrap()
    }

    #[tokio::test]
    async fn health_is_reachable_without_credentials() {
        let address = spawn_server(indoc! {r#"
            [llm.providers.openai]
            type = "openai"
            api_key = "sk-test"
        "#})
        .await;

        let response = reqwest::get(format!("http://{address}/health")).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn gateway_routes_require_a_valid_token() {
        let address = spawn_server(indoc! {r#"
            [[auth.keys]]
            token = "tok_abcdefgh12345678"
            user_id = "user-1"

            [llm.providers.openai]
            type = "openai"
            api_key = "sk-test"
            models = ["gpt-4o"]
        "#})
        .await;

        let client = reqwest::Client::new();

        // No credentials: rejected before any handler.
        let response = client
            .get(format!("http://{address}/v1/models"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);

        // Valid token: the request goes through.
        let response = client
            .get(format!("http://{address}/v1/models"))
            .bearer_auth("tok_abcdefgh12345678")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
}
