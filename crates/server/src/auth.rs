//! Bearer-token authentication for the gateway surfaces.
//!
//! Tokens look like `tok_<base64url>`. The first 12 characters (prefix
//! included) index the identity store; the SHA-256 of the full token is
//! the lookup key. Expired keys are rejected here, before any handler
//! runs.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use context::{ApiKeyStore, Authentication, MemoryApiKeyStore};
use jiff::Timestamp;
use llm::GatewayError;

pub(crate) async fn authenticate(
    State(store): State<Arc<MemoryApiKeyStore>>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve(store.as_ref(), &request) {
        Ok(authentication) => {
            request.extensions_mut().insert(authentication);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

fn resolve(store: &dyn ApiKeyStore, request: &Request) -> Result<Authentication, GatewayError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| GatewayError::Authentication("missing Authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| GatewayError::Authentication("expected a bearer token".to_string()))?;

    if !token.starts_with("tok_") {
        return Err(GatewayError::Authentication("malformed gateway token".to_string()));
    }

    let (key, user) = store
        .lookup_api_key(token)
        .ok_or_else(|| GatewayError::Authentication("unknown API key".to_string()))?;

    if key.is_expired(Timestamp::now()) {
        return Err(GatewayError::Authentication("API key has expired".to_string()));
    }

    Ok(Authentication {
        user_id: user.id,
        tenant_id: user.tenant_id,
        key_id: key.id,
    })
}
