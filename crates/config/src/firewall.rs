//! Content firewall configuration.

use std::{path::PathBuf, time::Duration};

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Operating mode of the firewall pipeline.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FirewallMode {
    /// No filter runs at all.
    #[default]
    Disabled,
    /// Every filter runs; detections are recorded, blocks are ignored.
    Monitor,
    /// Filters run in order; the first block aborts the request.
    Enforce,
    /// Like enforce, with PII tokenization active on both directions.
    Redact,
}

/// Backend used for the PII token store.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreBackend {
    /// Process-local map with session TTL.
    #[default]
    Memory,
    /// Distributed key/value store with per-key TTL.
    Redis,
}

/// Content firewall settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirewallConfig {
    /// Operating mode of the pipeline.
    pub mode: FirewallMode,
    /// Token store backend.
    pub store: TokenStoreBackend,
    /// Connection URL for the distributed store backend.
    pub store_url: Option<Url>,
    /// Key prefix for the distributed store backend.
    pub store_prefix: String,
    /// How long a session's token map is retained.
    #[serde(deserialize_with = "deserialize_duration")]
    pub session_ttl: Duration,
    /// Header carrying the client-supplied session identifier.
    pub session_header: String,
    /// Streaming detokenization buffer limits.
    pub sse: SseBufferConfig,
    /// Regex PII filter settings.
    pub regex_filter: Option<RegexFilterConfig>,
    /// External HTTP filter settings.
    pub external_filter: Option<ExternalFilterConfig>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            mode: FirewallMode::Disabled,
            store: TokenStoreBackend::Memory,
            store_url: None,
            store_prefix: "tokligence".to_string(),
            session_ttl: Duration::from_secs(3600),
            session_header: "X-Session-Id".to_string(),
            sse: SseBufferConfig::default(),
            regex_filter: None,
            external_filter: None,
        }
    }
}

/// Limits protecting the streaming detokenization buffer from stalling on
/// bracketed text longer than any plausible token.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SseBufferConfig {
    /// Maximum characters buffered while inside a bracket.
    pub max_buffer_length: usize,
    /// Maximum time a bracket may stay open before a forced flush.
    #[serde(deserialize_with = "deserialize_duration")]
    pub buffer_timeout: Duration,
}

impl Default for SseBufferConfig {
    fn default() -> Self {
        Self {
            max_buffer_length: 30,
            buffer_timeout: Duration::from_millis(500),
        }
    }
}

/// Settings for the built-in regex PII filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegexFilterConfig {
    /// Position in the pipeline; lower runs earlier.
    pub priority: i32,
    /// Path to a YAML pattern catalogue. The embedded catalogue is used
    /// when unset.
    pub patterns_file: Option<PathBuf>,
    /// Explicit `region.name` pattern selection. Overrides `regions`
    /// and `types` when non-empty.
    pub patterns: Vec<String>,
    /// Regions whose patterns are enabled.
    pub regions: Vec<String>,
    /// PII types to enable within the selected regions. Empty means all.
    pub types: Vec<String>,
    /// Whether detections are masked outside redact mode.
    pub redact_enabled: bool,
}

impl Default for RegexFilterConfig {
    fn default() -> Self {
        Self {
            priority: 10,
            patterns_file: None,
            patterns: Vec::new(),
            regions: vec!["global".to_string()],
            types: Vec::new(),
            redact_enabled: true,
        }
    }
}

/// Policy applied when the external filter service call fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorPolicy {
    /// Ignore the error and let the request proceed.
    #[default]
    Allow,
    /// Block the request with the error as the reason.
    Block,
    /// Surface the error to the pipeline, which logs and skips the filter.
    Bypass,
}

/// Settings for the external HTTP filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalFilterConfig {
    /// Name used in detections and logs.
    #[serde(default = "default_external_name")]
    pub name: String,
    /// Position in the pipeline; lower runs earlier.
    #[serde(default = "default_external_priority")]
    pub priority: i32,
    /// Endpoint receiving the analysis POST.
    pub endpoint: Url,
    /// Optional bearer token for the endpoint.
    #[serde(default)]
    pub token: Option<SecretString>,
    /// Per-call timeout.
    #[serde(default = "default_external_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// What to do when the service call fails.
    #[serde(default)]
    pub on_error: OnErrorPolicy,
}

fn default_external_name() -> String {
    "external".to_string()
}

fn default_external_priority() -> i32 {
    20
}

fn default_external_timeout() -> Duration {
    Duration::from_secs(5)
}
