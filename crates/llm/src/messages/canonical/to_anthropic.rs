//! Conversions from canonical types to Anthropic protocol types.

use std::collections::VecDeque;

use serde_json::{Value, json};

use crate::{
    error::GatewayError,
    messages::{anthropic, canonical},
};

/// Anthropic requires a positive max_tokens; used when the canonical
/// request leaves the budget unset.
const DEFAULT_MAX_TOKENS: u32 = 4096;

impl TryFrom<canonical::CanonicalRequest> for anthropic::ChatRequest {
    type Error = GatewayError;

    fn try_from(req: canonical::CanonicalRequest) -> Result<Self, Self::Error> {
        let mut messages = Vec::with_capacity(req.messages.len());
        let mut extra_system = Vec::new();

        // Tool-use ids awaiting a result, oldest first. Results without an
        // explicit id bind to the front of this queue.
        let mut pending_tool_ids: VecDeque<String> = VecDeque::new();

        for (msg_index, message) in req.messages.into_iter().enumerate() {
            match message.role {
                canonical::CanonicalRole::System => {
                    // Stray system messages fold into the system prompt.
                    extra_system.push(message.flattened_text());
                }
                canonical::CanonicalRole::User => {
                    messages.push(anthropic::Message {
                        role: anthropic::Role::User,
                        content: anthropic::MessageContent::Blocks(content_blocks(&message)),
                    });
                }
                canonical::CanonicalRole::Assistant => {
                    let mut blocks = content_blocks(&message);

                    if let Some(tool_calls) = message.tool_calls {
                        for (counter, call) in tool_calls.into_iter().enumerate() {
                            let id = call
                                .id
                                .unwrap_or_else(|| format!("tool_call_{msg_index}_{counter}"));

                            pending_tool_ids.push_back(id.clone());

                            blocks.push(anthropic::ContentBlock::ToolUse {
                                id,
                                name: call.name,
                                input: parse_arguments(&call.arguments),
                            });
                        }
                    }

                    messages.push(anthropic::Message {
                        role: anthropic::Role::Assistant,
                        content: anthropic::MessageContent::Blocks(blocks),
                    });
                }
                canonical::CanonicalRole::Tool => {
                    // A tool result references its call id; a missing id
                    // binds to the oldest unresolved call.
                    let tool_use_id = match message.tool_call_id.clone() {
                        Some(id) => {
                            pending_tool_ids.retain(|pending| *pending != id);
                            id
                        }
                        None => pending_tool_ids.pop_front().unwrap_or_default(),
                    };

                    let text = message.flattened_text();

                    messages.push(anthropic::Message {
                        role: anthropic::Role::User,
                        content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolResult {
                            tool_use_id,
                            content: json!([{"type": "text", "text": text}]),
                            is_error: None,
                        }]),
                    });
                }
            }
        }

        if messages.is_empty() {
            return Err(GatewayError::Validation(
                "request has no user or assistant messages".to_string(),
            ));
        }

        let system = match (req.system, extra_system.is_empty()) {
            (system, true) => system,
            (Some(system), false) => Some(format!("{system}\n{}", extra_system.join("\n"))),
            (None, false) => Some(extra_system.join("\n")),
        };

        // tool_choice "none" drops the tools entirely on this dialect;
        // with no tools, tool_choice is omitted.
        let (tools, tool_choice) = match (req.tools, req.tool_choice) {
            (_, Some(canonical::CanonicalToolChoice::None)) | (None, _) => (None, None),
            (Some(tools), choice) => {
                let converted: Vec<anthropic::Tool> =
                    tools.into_iter().filter_map(convert_tool).collect();

                if converted.is_empty() {
                    (None, None)
                } else {
                    (Some(converted), choice.map(anthropic::ToolChoice::from))
                }
            }
        };

        Ok(Self {
            model: req.model,
            messages,
            max_tokens: req.max_tokens.or(req.max_completion_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            metadata: req.user.map(|user_id| anthropic::Metadata { user_id: Some(user_id) }),
            tools,
            tool_choice,
            thinking: req.thinking.map(|thinking| anthropic::Thinking {
                thinking_type: thinking.thinking_type,
                budget_tokens: thinking.budget_tokens,
            }),
        })
    }
}

fn content_blocks(message: &canonical::CanonicalMessage) -> Vec<anthropic::ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(text) = &message.content
        && !text.is_empty()
    {
        blocks.push(anthropic::ContentBlock::Text { text: text.clone() });
    }

    if let Some(content_blocks) = &message.content_blocks {
        for block in content_blocks {
            match block {
                canonical::CanonicalContentBlock::Text { text } => {
                    blocks.push(anthropic::ContentBlock::Text { text: text.clone() });
                }
                canonical::CanonicalContentBlock::Image { source } => {
                    blocks.push(anthropic::ContentBlock::Image {
                        source: source.clone(),
                    });
                }
                canonical::CanonicalContentBlock::InputJson { data } => {
                    // Structured input travels as its JSON text on this
                    // dialect.
                    blocks.push(anthropic::ContentBlock::Text {
                        text: data.to_string(),
                    });
                }
            }
        }
    }

    blocks
}

/// Convert one canonical tool definition, dropping unnamed function
/// tools.
fn convert_tool(tool: canonical::CanonicalTool) -> Option<anthropic::Tool> {
    if tool.tool_type == "function" || tool.function.is_some() {
        let function = tool.function?;

        return Some(anthropic::Tool {
            tool_type: None,
            name: Some(function.name),
            description: function.description,
            input_schema: Some(function.parameters.unwrap_or_else(|| json!({"type": "object"}))),
            raw: serde_json::Map::new(),
        });
    }

    // MCP servers, computer-use tools and other vendor shapes pass
    // through with their raw fields intact.
    Some(anthropic::Tool {
        tool_type: Some(tool.tool_type),
        name: None,
        description: None,
        input_schema: None,
        raw: tool.raw,
    })
}

fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }

    match serde_json::from_str(raw) {
        Ok(value) => value,
        // Non-empty invalid JSON stays a string rather than vanishing.
        Err(_) => Value::String(raw.to_string()),
    }
}

impl From<canonical::CanonicalToolChoice> for anthropic::ToolChoice {
    fn from(choice: canonical::CanonicalToolChoice) -> Self {
        match choice {
            canonical::CanonicalToolChoice::Auto => anthropic::ToolChoice::Auto,
            // This dialect has no "none"; callers drop tools instead.
            canonical::CanonicalToolChoice::None => anthropic::ToolChoice::Auto,
            canonical::CanonicalToolChoice::Required => anthropic::ToolChoice::Any,
            canonical::CanonicalToolChoice::Specific(name) => anthropic::ToolChoice::Tool { name },
        }
    }
}

impl From<canonical::CanonicalFinishReason> for anthropic::StopReason {
    fn from(reason: canonical::CanonicalFinishReason) -> Self {
        match reason {
            canonical::CanonicalFinishReason::Stop => anthropic::StopReason::EndTurn,
            canonical::CanonicalFinishReason::Length => anthropic::StopReason::MaxTokens,
            canonical::CanonicalFinishReason::ToolCalls => anthropic::StopReason::ToolUse,
            canonical::CanonicalFinishReason::ContentFilter => anthropic::StopReason::Refusal,
        }
    }
}

impl From<canonical::UsageBreakdown> for anthropic::Usage {
    fn from(usage: canonical::UsageBreakdown) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
        }
    }
}

impl From<canonical::CanonicalResponse> for anthropic::ChatResponse {
    fn from(resp: canonical::CanonicalResponse) -> Self {
        let usage = anthropic::Usage::from(resp.usage);

        let (content, stop_reason) = resp
            .choices
            .into_iter()
            .next()
            .map(|choice| {
                let mut blocks = Vec::new();

                if let Some(text) = choice.message.content
                    && !text.is_empty()
                {
                    blocks.push(anthropic::ContentBlock::Text { text });
                }

                if let Some(tool_calls) = choice.message.tool_calls {
                    for call in tool_calls {
                        blocks.push(anthropic::ContentBlock::ToolUse {
                            id: call.id.unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4())),
                            name: call.name,
                            input: parse_arguments(&call.arguments),
                        });
                    }
                }

                (blocks, choice.finish_reason.map(anthropic::StopReason::from))
            })
            .unwrap_or_default();

        Self {
            id: resp.id,
            r#type: "message".to_string(),
            role: anthropic::Role::Assistant,
            content,
            model: resp.model,
            stop_reason,
            stop_sequence: None,
            usage,
        }
    }
}

impl From<canonical::CanonicalChunk> for anthropic::StreamEvent {
    fn from(chunk: canonical::CanonicalChunk) -> Self {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return anthropic::StreamEvent::Ping;
        };

        if let Some(content) = choice.delta.content {
            return anthropic::StreamEvent::ContentBlockDelta {
                index: choice.index,
                delta: anthropic::ContentDelta::TextDelta { text: content },
            };
        }

        if let Some(tool_calls) = choice.delta.tool_calls
            && let Some(call) = tool_calls.into_iter().next()
        {
            // A start delta carries the id and name; argument deltas carry
            // only the fragment.
            return match (call.id, call.name) {
                (Some(id), Some(name)) => anthropic::StreamEvent::ContentBlockStart {
                    index: call.index,
                    content_block: anthropic::ContentBlock::ToolUse {
                        id,
                        name,
                        input: json!({}),
                    },
                },
                _ => anthropic::StreamEvent::ContentBlockDelta {
                    index: call.index,
                    delta: anthropic::ContentDelta::InputJsonDelta {
                        partial_json: call.arguments.unwrap_or_default(),
                    },
                },
            };
        }

        if let Some(finish_reason) = choice.finish_reason {
            return anthropic::StreamEvent::MessageDelta {
                delta: anthropic::MessageDeltaBody {
                    stop_reason: Some(anthropic::StopReason::from(finish_reason)),
                    stop_sequence: None,
                },
                usage: chunk.usage.map(anthropic::Usage::from),
            };
        }

        anthropic::StreamEvent::Ping
    }
}
