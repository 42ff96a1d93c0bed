//! Anthropic chat adapter.
//!
//! The heavier of the two chat adapters: it owns the model alias table
//! and the state machine that turns Anthropic's typed SSE events into
//! canonical chunks, including tool-use block assembly across deltas.

use std::collections::HashMap;

use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};

use crate::{
    adapter::{CHUNK_CHANNEL_CAPACITY, ChatStream},
    error::{GatewayError, upstream_message},
    http_client::upstream_client,
    messages::{
        anthropic::{ChatRequest, ChatResponse, ContentBlock, ContentDelta, StreamEvent, Usage},
        canonical::{
            CanonicalChoiceDelta, CanonicalChunk, CanonicalDelta, CanonicalFinishReason, CanonicalRequest,
            CanonicalResponse, CanonicalRole, CanonicalToolCallDelta, UsageBreakdown,
            from_anthropic::now_unix,
        },
    },
    request::RequestContext,
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
const VENDOR: &str = "anthropic";

/// The current dated Sonnet id, used for aliases and as the fallback.
const CURRENT_SONNET: &str = "claude-sonnet-4-20250514";
const CURRENT_OPUS: &str = "claude-opus-4-20250514";
const CURRENT_HAIKU: &str = "claude-3-5-haiku-20241022";

/// Map OpenAI-style and short aliases to current dated model ids.
///
/// Fully-qualified `claude-…` names pass through unchanged; anything
/// unrecognized defaults to the current Sonnet.
pub(crate) fn resolve_model_alias(model: &str) -> String {
    match model {
        "claude" | "claude-sonnet" | "claude-3-sonnet" | "claude-3-5-sonnet" | "gpt-4" | "gpt-4-turbo" | "gpt-4o" => {
            CURRENT_SONNET.to_string()
        }
        "claude-opus" | "claude-3-opus" => CURRENT_OPUS.to_string(),
        "claude-haiku" | "claude-3-haiku" | "claude-3-5-haiku" | "gpt-4o-mini" | "gpt-3.5-turbo" => {
            CURRENT_HAIKU.to_string()
        }
        name if name.starts_with("claude-") => name.to_string(),
        _ => CURRENT_SONNET.to_string(),
    }
}

/// Chat completions against the Anthropic Messages API.
pub(crate) struct AnthropicChatAdapter {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    api_version: String,
}

impl AnthropicChatAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: upstream_client(config.timeout),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string()),
            api_key: config.api_key.clone(),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_VERSION.to_string()),
        }
    }

    fn build_wire_request(&self, mut request: CanonicalRequest) -> crate::Result<ChatRequest> {
        request.model = resolve_model_alias(&request.model);
        ChatRequest::try_from(request)
    }

    fn request_builder(&self, url: &str) -> crate::Result<reqwest::RequestBuilder> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| GatewayError::Internal(Some("no API key configured for anthropic".to_string())))?;

        Ok(self
            .client
            .post(url)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", self.api_version.clone())
            .header("content-type", "application/json"))
    }

    pub async fn chat(&self, request: CanonicalRequest, context: &RequestContext) -> crate::Result<CanonicalResponse> {
        let url = format!("{}/messages", self.base_url);
        let original_model = request.model.clone();

        let mut wire_request = self.build_wire_request(request)?;
        wire_request.stream = None;

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Anthropic request: {e}");
            GatewayError::Internal(None)
        })?;

        let response = self
            .request_builder(&url)?
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Connection {
                vendor: VENDOR,
                message: e.to_string(),
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!(
                "Anthropic API error ({status}) for request {}: {error_text}",
                context.request_id
            );

            return Err(GatewayError::Upstream {
                vendor: VENDOR,
                message: upstream_message(status.as_u16(), &error_text),
            });
        }

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read Anthropic response body: {e}");
            GatewayError::Internal(None)
        })?;

        let anthropic_response: ChatResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse Anthropic response: {e}");
            log::error!("Raw response that failed to parse: {response_text}");
            GatewayError::Connection {
                vendor: VENDOR,
                message: format!("decode error: {e}"),
            }
        })?;

        let mut response = CanonicalResponse::from(anthropic_response);
        response.model = original_model;

        Ok(response)
    }

    pub async fn chat_stream(
        &self,
        request: CanonicalRequest,
        context: &RequestContext,
    ) -> crate::Result<ChatStream> {
        let url = format!("{}/messages", self.base_url);
        let original_model = request.model.clone();

        let mut wire_request = self.build_wire_request(request)?;
        wire_request.stream = Some(true);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Anthropic streaming request: {e}");
            GatewayError::Internal(None)
        })?;

        let response = self
            .request_builder(&url)?
            .header("accept", "text/event-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Connection {
                vendor: VENDOR,
                message: e.to_string(),
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!(
                "Anthropic streaming API error ({status}) for request {}: {error_text}",
                context.request_id
            );

            return Err(GatewayError::Upstream {
                vendor: VENDOR,
                message: upstream_message(status.as_u16(), &error_text),
            });
        }

        let (sender, receiver) = tokio::sync::mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let mut events = response.bytes_stream().eventsource();
        let mut processor = AnthropicStreamProcessor::new(original_model);

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("SSE parsing error in Anthropic stream: {e}");
                        continue;
                    }
                };

                // Some upstreams send the terminal event with a bare event
                // name and no data payload.
                if event.data.is_empty() && event.event == "message_stop" {
                    break;
                }

                let Ok(stream_event) = sonic_rs::from_str::<StreamEvent>(&event.data) else {
                    log::warn!("Failed to parse Anthropic streaming event");
                    continue;
                };

                if matches!(stream_event, StreamEvent::MessageStop) {
                    break;
                }

                if let StreamEvent::Error { ref error } = stream_event {
                    log::error!("Anthropic stream error event: {} - {}", error.r#type, error.message);

                    let _ = sender
                        .send(Err(GatewayError::Upstream {
                            vendor: VENDOR,
                            message: format!("{} ({})", error.message, error.r#type),
                        }))
                        .await;
                    break;
                }

                if let Some(chunk) = processor.process_event(stream_event)
                    && sender.send(Ok(chunk)).await.is_err()
                {
                    // Client went away; stop reading the upstream.
                    break;
                }
            }
        });

        Ok(receiver)
    }
}

struct ToolState {
    /// Position in the canonical tool_calls array; content block indices
    /// from the wire are remapped onto this monotonically increasing
    /// sequence.
    canonical_index: u32,
}

/// State machine converting Anthropic stream events into canonical
/// chunks.
///
/// Tracks whether the assistant role has been emitted (it rides on the
/// first delta, never a standalone chunk) and which content block
/// indices belong to tool-use blocks.
pub(crate) struct AnthropicStreamProcessor {
    model: String,
    message_id: String,
    created: u64,
    role_emitted: bool,
    tool_blocks: HashMap<u32, ToolState>,
    next_tool_index: u32,
    usage: Option<UsageBreakdown>,
}

impl AnthropicStreamProcessor {
    pub fn new(model: String) -> Self {
        Self {
            model,
            message_id: String::new(),
            created: now_unix(),
            role_emitted: false,
            tool_blocks: HashMap::new(),
            next_tool_index: 0,
            usage: None,
        }
    }

    fn chunk(&mut self, delta: CanonicalDelta, finish_reason: Option<CanonicalFinishReason>) -> CanonicalChunk {
        let mut delta = delta;

        // The assistant role is emitted exactly once, on the first delta.
        if !self.role_emitted {
            delta.role = Some(CanonicalRole::Assistant);
            self.role_emitted = true;
        }

        CanonicalChunk {
            id: self.message_id.clone(),
            model: self.model.clone(),
            created: self.created,
            choices: vec![CanonicalChoiceDelta {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: finish_reason.is_some().then_some(self.usage).flatten(),
        }
    }

    pub fn process_event(&mut self, event: StreamEvent) -> Option<CanonicalChunk> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                self.usage = Some(UsageBreakdown::from(message.usage));
                None
            }

            StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    let canonical_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_blocks.insert(index, ToolState { canonical_index });

                    let delta = CanonicalDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![CanonicalToolCallDelta {
                            index: canonical_index,
                            id: Some(id),
                            call_type: Some("function".to_string()),
                            name: Some(name),
                            arguments: None,
                        }]),
                    };

                    Some(self.chunk(delta, None))
                }
                _ => None,
            },

            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => {
                    let delta = CanonicalDelta {
                        role: None,
                        content: Some(text),
                        tool_calls: None,
                    };

                    Some(self.chunk(delta, None))
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    // Fragments for unknown block indices are dropped.
                    let state = self.tool_blocks.get(&index)?;

                    let delta = CanonicalDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![CanonicalToolCallDelta {
                            index: state.canonical_index,
                            id: None,
                            call_type: None,
                            name: None,
                            arguments: Some(partial_json),
                        }]),
                    };

                    Some(self.chunk(delta, None))
                }
            },

            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage = Some(merge_usage(self.usage, usage));
                }

                let finish_reason = delta.stop_reason.map(CanonicalFinishReason::from);
                finish_reason.map(|reason| self.chunk(CanonicalDelta::default(), Some(reason)))
            }

            // message_stop and errors are handled by the read loop; pings
            // and block stops carry nothing.
            _ => None,
        }
    }
}

/// Streaming deltas may omit input token counts; keep the figures from
/// message_start where the delta has none.
fn merge_usage(existing: Option<UsageBreakdown>, delta: Usage) -> UsageBreakdown {
    let existing = existing.unwrap_or_default();

    UsageBreakdown {
        prompt_tokens: if delta.input_tokens > 0 {
            delta.input_tokens
        } else {
            existing.prompt_tokens
        },
        completion_tokens: delta.output_tokens,
        total_tokens: if delta.input_tokens > 0 {
            delta.input_tokens + delta.output_tokens
        } else {
            existing.prompt_tokens + delta.output_tokens
        },
        cache_creation_input_tokens: delta.cache_creation_input_tokens.or(existing.cache_creation_input_tokens),
        cache_read_input_tokens: delta.cache_read_input_tokens.or(existing.cache_read_input_tokens),
        reasoning_tokens: None,
    }
}
