use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::messages::anthropic;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request failed validation before reaching any adapter.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A firewall filter refused the request.
    #[error("Request blocked: {0}")]
    Blocked(String),

    /// Authentication failed (missing, unknown or expired API key).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No configured adapter can serve the request.
    #[error("No provider configured for this request: {0}")]
    NoProvider(String),

    /// The upstream returned a structured or plain error.
    ///
    /// `message` is pre-formatted as either `<detail> (type=…, code=…)`
    /// or `http <status>: <body prefix>`; display prepends the vendor.
    #[error("{vendor}: {message}")]
    Upstream {
        /// Which vendor produced the error.
        vendor: &'static str,
        /// Single-line error description.
        message: String,
    },

    /// Transport or decode failure talking to the upstream.
    #[error("{vendor}: {message}")]
    Connection {
        /// Which vendor the call targeted.
        vendor: &'static str,
        /// Underlying failure, verbatim.
        message: String,
    },

    /// Internal error. `Some` messages came from elsewhere and can be
    /// shown; `None` must not leak details.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl GatewayError {
    /// The HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Blocked(_) => StatusCode::FORBIDDEN,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::NoProvider(_) => StatusCode::NOT_FOUND,
            Self::Upstream { .. } | Self::Connection { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error type string for the response body.
    pub fn error_type(&self) -> &str {
        match self {
            Self::Validation(_) => "invalid_request_error",
            Self::Blocked(_) => "request_blocked",
            Self::Authentication(_) => "authentication_error",
            Self::NoProvider(_) => "not_found_error",
            Self::Upstream { .. } | Self::Connection { .. } => "api_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(message)) => message.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// The same errors wrapped in Anthropic's error envelope for the
/// Anthropic-dialect ingress surface.
pub struct AnthropicGatewayError {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<GatewayError> for AnthropicGatewayError {
    fn from(error: GatewayError) -> Self {
        let status = error.status_code();

        let body = anthropic::ErrorResponse {
            r#type: "error".to_string(),
            error: anthropic::ErrorBody {
                r#type: error.error_type().to_string(),
                message: error.client_message(),
            },
        };

        Self { status, body }
    }
}

impl IntoResponse for AnthropicGatewayError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicGatewayError>;

/// Format an upstream error body per the wire contract: the structured
/// `{"error": {...}}` shape when present, a truncated body prefix
/// otherwise.
pub(crate) fn upstream_message(status: u16, body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct VendorError {
        error: VendorErrorDetails,
    }

    #[derive(serde::Deserialize)]
    struct VendorErrorDetails {
        message: String,
        #[serde(default)]
        r#type: Option<String>,
        #[serde(default)]
        code: Option<serde_json::Value>,
    }

    if let Ok(parsed) = serde_json::from_str::<VendorError>(body) {
        let error_type = parsed.error.r#type.unwrap_or_default();
        let code = parsed
            .error
            .code
            .map(|code| code.to_string().trim_matches('"').to_string())
            .unwrap_or_default();

        return format!("{} (type={error_type}, code={code})", parsed.error.message);
    }

    let prefix: String = body.chars().take(200).collect();
    format!("http {status}: {prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_upstream_errors_format_as_one_line() {
        let body = r#"{"error":{"message":"model not found","type":"invalid_request_error","code":"model_not_found"}}"#;

        assert_eq!(
            upstream_message(404, body),
            "model not found (type=invalid_request_error, code=model_not_found)"
        );
    }

    #[test]
    fn unstructured_upstream_errors_keep_a_body_prefix() {
        assert_eq!(upstream_message(503, "service warming up"), "http 503: service warming up");
    }

    #[test]
    fn status_codes_match_error_kinds() {
        assert_eq!(GatewayError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::Blocked("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::Authentication("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Connection {
                vendor: "openai",
                message: "refused".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        assert_eq!(GatewayError::Internal(None).client_message(), "Internal server error");
        assert_eq!(
            GatewayError::Internal(Some("upstream said so".into())).client_message(),
            "upstream said so"
        );
    }
}
