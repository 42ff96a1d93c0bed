//! Anthropic wire schema for the Messages API.
//!
//! Mirrors the request, response and streaming event formats of the
//! [Anthropic Messages API](https://docs.anthropic.com/en/api/messages).
//! The same shapes serve both the Anthropic-compatible ingress surface
//! and the outbound Anthropic adapter, so every type derives both
//! `Serialize` and `Deserialize`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request body for the messages endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,

    /// Alternating user/assistant content-block sequences.
    pub messages: Vec<Message>,

    /// Required by the API; defaulted by the adapter when the canonical
    /// request leaves it unset.
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
}

/// Extended thinking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thinking {
    #[serde(rename = "type")]
    pub thinking_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

/// A message with role and content blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Message content: a bare string (accepted on ingress) or blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Message role. The API has no system or tool roles; system text lives
/// in the top-level field and tool results are user-role blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image { source: Value },

    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Tool definition.
///
/// Function tools carry `name`/`description`/`input_schema`; MCP servers
/// and vendor computer-use tools keep their fields in the flattened raw
/// bag so the adapter never needs their schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Tool choice directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to use tools.
    Auto,

    /// The model must use at least one tool.
    Any,

    /// The model must use the named tool.
    Tool { name: String },
}

/// Non-streaming response from the messages endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,

    pub r#type: String,

    pub role: Role,

    pub content: Vec<ContentBlock>,

    pub model: String,

    pub stop_reason: Option<StopReason>,

    pub stop_sequence: Option<String>,

    pub usage: Usage,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    Refusal,
    /// Forward compatibility with reasons this gateway does not know.
    #[serde(untagged)]
    Other(String),
}

/// Token usage. `input_tokens` may be omitted on streaming deltas.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,

    #[serde(default)]
    pub output_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

/// Server-sent event in a streaming response.
///
/// Event flow for a typical stream:
/// 1. `message_start`: message metadata, empty content
/// 2. `content_block_start`: a text or tool_use block begins
/// 3. `content_block_delta`: incremental text or JSON fragments
/// 4. `content_block_stop`: the block is complete
/// 5. `message_delta`: stop reason and final usage
/// 6. `message_stop`: end of stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart { message: MessageStart },

    ContentBlockStart { index: u32, content_block: ContentBlock },

    ContentBlockDelta { index: u32, delta: ContentDelta },

    ContentBlockStop { index: u32 },

    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    MessageStop,

    Ping,

    Error { error: ErrorBody },
}

/// Initial message metadata in `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStart {
    pub id: String,

    pub model: String,

    pub role: Role,

    /// Always empty here; content arrives through block events.
    #[serde(default)]
    pub content: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    #[serde(default)]
    pub usage: Usage,
}

/// Incremental update to a content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text fragment to append.
    TextDelta { text: String },

    /// Partial JSON fragment of tool arguments.
    InputJsonDelta { partial_json: String },
}

/// Final metadata in `message_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// Error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub r#type: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub r#type: String,
    pub message: String,
}

/// A model on the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,

    pub r#type: String,

    pub display_name: String,

    pub created_at: u64,
}

/// Response of the model listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelInfo>,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_tool_use_stream_event() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {
                "type": "tool_use",
                "id": "toolu_01",
                "name": "write_file",
                "input": {}
            }
        }))
        .unwrap();

        let StreamEvent::ContentBlockStart { index, content_block } = event else {
            unreachable!("wrong variant");
        };

        assert_eq!(index, 1);
        assert!(matches!(content_block, ContentBlock::ToolUse { ref id, .. } if id == "toolu_01"));
    }

    #[test]
    fn unknown_stop_reasons_are_preserved() {
        let reason: StopReason = serde_json::from_value(json!("pause_turn")).unwrap();
        assert!(matches!(reason, StopReason::Other(ref s) if s == "pause_turn"));
    }

    #[test]
    fn mcp_tool_fields_survive_a_round_trip() {
        let raw = json!({
            "type": "url",
            "url": "https://mcp.example.com",
            "name": "docs",
            "authorization_token": "secret",
            "tool_configuration": {"enabled": true}
        });

        let tool: Tool = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(tool.raw["url"], json!("https://mcp.example.com"));
        assert_eq!(serde_json::to_value(&tool).unwrap(), raw);
    }

    #[test]
    fn usage_defaults_missing_input_tokens() {
        let usage: Usage = serde_json::from_value(json!({"output_tokens": 7})).unwrap();
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.output_tokens, 7);
    }
}
