//! Vendor-neutral representation of chat and embedding traffic.
//!
//! Every ingress dialect converts into these types and every adapter
//! converts out of them, so the firewall and the streaming machinery
//! only ever see one shape. The conversion flow:
//!
//! ```text
//! Protocol Request → CanonicalRequest → Adapter → CanonicalResponse → Protocol Response
//! ```
//!
//! Conversions live in the sibling modules, one per protocol direction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

pub(crate) mod from_anthropic;
pub(crate) mod from_openai;
pub(crate) mod to_anthropic;
pub(crate) mod to_openai;

/// A chat request in vendor-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Model identifier, vendor-neutral or vendor-specific.
    pub model: String,

    /// Ordered conversation messages. System messages have already been
    /// folded into `system`.
    pub messages: Vec<CanonicalMessage>,

    /// System prompt: every system message newline-joined, order
    /// preserved.
    pub system: Option<String>,

    pub max_tokens: Option<u32>,

    /// Replacement for `max_tokens` on newer OpenAI models; adapters
    /// fall back to it when `max_tokens` is unset.
    pub max_completion_tokens: Option<u32>,

    pub temperature: Option<f32>,

    pub top_p: Option<f32>,

    pub stop_sequences: Option<Vec<String>>,

    pub stream: Option<bool>,

    pub tools: Option<Vec<CanonicalTool>>,

    pub tool_choice: Option<CanonicalToolChoice>,

    pub parallel_tool_calls: Option<bool>,

    pub response_format: Option<Value>,

    pub reasoning_effort: Option<String>,

    pub thinking: Option<ThinkingConfig>,

    pub web_search_options: Option<Value>,

    pub user: Option<String>,

    pub metadata: Option<Map<String, Value>>,
}

impl CanonicalRequest {
    /// Validation shared by every ingress surface. Failures here never
    /// reach an adapter.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.is_empty() {
            return Err(GatewayError::Validation("model must not be empty".to_string()));
        }

        if self.messages.is_empty() && self.system.is_none() {
            return Err(GatewayError::Validation("messages must not be empty".to_string()));
        }

        Ok(())
    }

    /// The effective completion budget, preferring `max_tokens`.
    pub fn completion_budget(&self) -> Option<u32> {
        self.max_tokens.or(self.max_completion_tokens)
    }
}

/// Extended thinking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub thinking_type: String,
    pub budget_tokens: Option<u32>,
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,

    /// Plain text content. Empty when the message carries only blocks or
    /// tool calls.
    pub content: Option<String>,

    /// Multipart content, when the client sent typed blocks.
    pub content_blocks: Option<Vec<CanonicalContentBlock>>,

    /// Tool invocations; assistant messages only.
    pub tool_calls: Option<Vec<CanonicalToolCall>>,

    /// Which call a tool message answers. When the client omits it, the
    /// adapter binds the result to the oldest unresolved tool call.
    pub tool_call_id: Option<String>,

    /// Per-message caching hint.
    pub cache_control: Option<Value>,
}

impl CanonicalMessage {
    /// A plain text message with the given role.
    pub fn text(role: CanonicalRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            content_blocks: None,
            tool_calls: None,
            tool_call_id: None,
            cache_control: None,
        }
    }

    /// All text carried by this message, blocks included.
    pub fn flattened_text(&self) -> String {
        let mut text = self.content.clone().unwrap_or_default();

        if let Some(blocks) = &self.content_blocks {
            for block in blocks {
                if let CanonicalContentBlock::Text { text: block_text } = block {
                    text.push_str(block_text);
                }
            }
        }

        text
    }
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Typed content block in a multipart message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalContentBlock {
    Text { text: String },

    /// Image reference or inline data, preserved as the client sent it.
    Image { source: Value },

    /// Structured JSON input.
    InputJson { data: Value },
}

/// Tool definition, a `type` tag plus the raw parameter map.
///
/// Only function tools get a typed view; everything else (MCP servers,
/// vendor computer-use tools) keeps its fields in `raw` so unfamiliar
/// shapes survive the round trip untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTool {
    pub tool_type: String,

    pub function: Option<CanonicalFunctionDef>,

    pub raw: Map<String, Value>,
}

/// Function tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalFunctionDef {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<Value>,
    pub strict: Option<bool>,
}

/// Tool choice directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CanonicalToolChoice {
    Auto,
    None,
    Required,
    /// Force the named tool.
    Specific(String),
}

/// A tool invocation issued by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    /// Missing ids are synthesized by the adapter that needs them.
    pub id: Option<String>,
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// A chat response in vendor-neutral form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub choices: Vec<CanonicalChoice>,
    pub usage: UsageBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChoice {
    pub index: u32,
    pub message: CanonicalMessage,
    pub finish_reason: Option<CanonicalFinishReason>,
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Token accounting, including provider cache and reasoning counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageBreakdown {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cache_creation_input_tokens: Option<u32>,
    pub cache_read_input_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
}

/// One streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChunk {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub choices: Vec<CanonicalChoiceDelta>,
    /// Present on the final chunk only.
    pub usage: Option<UsageBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalChoiceDelta {
    pub index: u32,
    pub delta: CanonicalDelta,
    pub finish_reason: Option<CanonicalFinishReason>,
}

/// Incremental message content. At most one of `role`, `content` or
/// `tool_calls` is populated per delta.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalDelta {
    /// Present exactly once, on the first delta of the stream.
    pub role: Option<CanonicalRole>,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<CanonicalToolCallDelta>>,
}

/// Incremental tool call content.
///
/// Within one choice the `index` increases monotonically; `id` and
/// `name` appear exactly once per index on the start delta, and
/// `arguments` deltas carry only the suffix JSON fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub call_type: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_empty_messages() {
        let request = CanonicalRequest {
            model: "gpt-4o".to_string(),
            messages: Vec::new(),
            system: None,
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            reasoning_effort: None,
            thinking: None,
            web_search_options: None,
            user: None,
            metadata: None,
        };

        assert!(request.validate().is_err());
    }

    #[test]
    fn completion_budget_prefers_max_tokens() {
        let mut request = CanonicalRequest {
            model: "m".to_string(),
            messages: vec![CanonicalMessage::text(CanonicalRole::User, "hi")],
            system: None,
            max_tokens: Some(100),
            max_completion_tokens: Some(200),
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            response_format: None,
            reasoning_effort: None,
            thinking: None,
            web_search_options: None,
            user: None,
            metadata: None,
        };

        assert_eq!(request.completion_budget(), Some(100));

        request.max_tokens = None;
        assert_eq!(request.completion_budget(), Some(200));
    }

    #[test]
    fn flattened_text_includes_blocks() {
        let message = CanonicalMessage {
            role: CanonicalRole::User,
            content: Some("intro ".to_string()),
            content_blocks: Some(vec![
                CanonicalContentBlock::Text {
                    text: "and block".to_string(),
                },
                CanonicalContentBlock::InputJson {
                    data: serde_json::json!({"k": "v"}),
                },
            ]),
            tool_calls: None,
            tool_call_id: None,
            cache_control: None,
        };

        assert_eq!(message.flattened_text(), "intro and block");
    }
}
