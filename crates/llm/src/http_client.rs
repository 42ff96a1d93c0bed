//! Outbound HTTP client construction for the vendor adapters.

use std::time::Duration;

use reqwest::Client;

/// Idle pooled connections are dropped after this long. Vendor APIs sit
/// behind rotating load balancers, so a connection that sat out a quiet
/// period is better re-established than reused.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the HTTP client for one upstream provider.
///
/// Each adapter owns its client so the per-provider deadline from the
/// configuration applies to every call, streaming reads included: a
/// stream that produces nothing for the whole deadline is abandoned
/// rather than holding the ingress writer open. Request bodies are small
/// JSON payloads, so the pool favors connection reuse over fan-out and
/// disables Nagle's algorithm to keep chunk latency down.
pub(crate) fn upstream_client(deadline: Duration) -> Client {
    Client::builder()
        .timeout(deadline)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("Falling back to an untuned HTTP client: {e}");
            Client::new()
        })
}
