use axum::http::HeaderMap;
use context::Authentication;

/// Runtime context for one gateway request.
///
/// Created at ingress and threaded through the firewall and the adapter
/// call. The session id must survive into the SSE buffer or streamed
/// detokenization silently no-ops.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    /// Correlates log lines for one request.
    pub request_id: String,
    /// Tokenization session for this request.
    pub session_id: String,
    /// Authenticated user.
    pub user_id: String,
    /// Tenant of the authenticated user, when known.
    pub tenant_id: Option<String>,
}

/// Build the request context from headers and resolved authentication.
///
/// The session id prefers the client-supplied header and falls back to a
/// fresh opaque id for this request.
pub(crate) fn extract_context(
    headers: &HeaderMap,
    session_header: &str,
    authentication: Option<&Authentication>,
) -> RequestContext {
    let session_id = headers
        .get(session_header)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    RequestContext {
        request_id: uuid::Uuid::new_v4().to_string(),
        session_id,
        user_id: authentication.map(|auth| auth.user_id.clone()).unwrap_or_default(),
        tenant_id: authentication.and_then(|auth| auth.tenant_id.clone()),
    }
}
