//! Per-request filter context.

use std::{collections::HashMap, sync::Arc};

use jiff::Timestamp;
use serde::Serialize;
use serde_json::Value;

use crate::{FirewallMode, store::PiiToken, tokenizer::Tokenizer};

/// A single filter observation.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Name of the filter that made the observation.
    pub filter: String,
    /// Kind of detection, e.g. `pii`.
    #[serde(rename = "type")]
    pub detection_type: String,
    /// Severity as reported by the detector.
    pub severity: String,
    /// Which phase observed it: `input` or `output`.
    pub location: String,
    /// Free-form details (pii_type, pattern, confidence, ...).
    pub details: HashMap<String, Value>,
    /// When the detection was recorded, UTC.
    pub timestamp: Timestamp,
}

/// Mutable state threaded through the filter chain for one request.
///
/// Filters treat `request_body` as read-only; mutations go into
/// `modified_request_body`, which the pipeline swaps into place only after
/// the whole pass has run. The same applies to the response fields during
/// the output phase.
#[derive(Default)]
pub struct FilterContext {
    /// The request body as received from the client.
    pub request_body: String,
    /// Model named by the request.
    pub request_model: String,
    /// Ingress endpoint, e.g. `/v1/chat/completions`.
    pub endpoint: String,
    /// Authenticated user.
    pub user_id: String,
    /// Tenant of the authenticated user, when known.
    pub tenant_id: Option<String>,
    /// Tokenization session for this request.
    pub session_id: String,
    /// Opaque metadata forwarded to filters.
    pub metadata: HashMap<String, Value>,

    /// Replacement request body produced during the input phase.
    pub modified_request_body: Option<String>,
    /// Free-form filter annotations.
    pub annotations: HashMap<String, Value>,
    /// Detections recorded by filters.
    pub detections: Vec<Detection>,
    /// Tokens minted for this request.
    pub pii_tokens: Vec<PiiToken>,
    /// Set by a filter to refuse the request.
    pub block: bool,
    /// Human-readable reason accompanying `block`.
    pub block_reason: Option<String>,

    /// The upstream response body during the output phase.
    pub response_body: Option<String>,
    /// Replacement response body produced during the output phase.
    pub modified_response_body: Option<String>,

    /// Active pipeline mode, visible to filters.
    pub mode: FirewallMode,
    /// Tokenizer handle; present only in redact mode.
    pub tokenizer: Option<Arc<Tokenizer>>,
}

impl FilterContext {
    /// Record a detection.
    pub fn add_detection(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    /// Refuse the request with a reason.
    pub fn set_block(&mut self, reason: impl Into<String>) {
        self.block = true;
        self.block_reason = Some(reason.into());
    }
}
