//! Conversions from Anthropic protocol types to canonical types.

use serde_json::Value;

use crate::messages::{anthropic, canonical};

impl From<anthropic::ChatRequest> for canonical::CanonicalRequest {
    fn from(req: anthropic::ChatRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len());

        for message in req.messages {
            messages.extend(split_message(message));
        }

        Self {
            model: req.model,
            messages,
            system: req.system,
            max_tokens: Some(req.max_tokens),
            max_completion_tokens: None,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            tools: req
                .tools
                .map(|tools| tools.into_iter().map(canonical::CanonicalTool::from).collect()),
            tool_choice: req.tool_choice.map(canonical::CanonicalToolChoice::from),
            parallel_tool_calls: None,
            response_format: None,
            reasoning_effort: None,
            thinking: req.thinking.map(|thinking| canonical::ThinkingConfig {
                thinking_type: thinking.thinking_type,
                budget_tokens: thinking.budget_tokens,
            }),
            web_search_options: None,
            user: req.metadata.and_then(|metadata| metadata.user_id),
            metadata: None,
        }
    }
}

/// Split one Anthropic message into canonical messages.
///
/// Tool results ride inside user messages on this dialect; each becomes
/// its own canonical tool message so the adapters downstream see the
/// OpenAI-style shape. Remaining text and tool_use blocks stay on the
/// original role.
fn split_message(message: anthropic::Message) -> Vec<canonical::CanonicalMessage> {
    let role = canonical::CanonicalRole::from(message.role);

    let blocks = match message.content {
        anthropic::MessageContent::Text(text) => {
            return vec![canonical::CanonicalMessage::text(role, text)];
        }
        anthropic::MessageContent::Blocks(blocks) => blocks,
    };

    let mut tool_results = Vec::new();
    let mut text = String::new();
    let mut content_blocks = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            anthropic::ContentBlock::Text { text: block_text } => text.push_str(&block_text),
            anthropic::ContentBlock::Image { source } => {
                content_blocks.push(canonical::CanonicalContentBlock::Image { source });
            }
            anthropic::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(canonical::CanonicalToolCall {
                    id: Some(id),
                    name,
                    arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                });
            }
            anthropic::ContentBlock::ToolResult {
                tool_use_id, content, ..
            } => {
                tool_results.push(canonical::CanonicalMessage {
                    role: canonical::CanonicalRole::Tool,
                    content: Some(tool_result_text(&content)),
                    content_blocks: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                    cache_control: None,
                });
            }
        }
    }

    let mut messages = tool_results;

    let has_content = !text.is_empty() || !content_blocks.is_empty() || !tool_calls.is_empty();

    if has_content {
        messages.push(canonical::CanonicalMessage {
            role,
            content: (!text.is_empty()).then_some(text),
            content_blocks: (!content_blocks.is_empty()).then_some(content_blocks),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            cache_control: None,
        });
    }

    messages
}

/// Flatten a tool_result content value into plain text.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                if item.get("type").and_then(Value::as_str) == Some("text") {
                    item.get("text").and_then(Value::as_str).map(str::to_string)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}

impl From<anthropic::Role> for canonical::CanonicalRole {
    fn from(role: anthropic::Role) -> Self {
        match role {
            anthropic::Role::User => canonical::CanonicalRole::User,
            anthropic::Role::Assistant => canonical::CanonicalRole::Assistant,
        }
    }
}

impl From<anthropic::Tool> for canonical::CanonicalTool {
    fn from(tool: anthropic::Tool) -> Self {
        let tool_type = tool.tool_type.unwrap_or_else(|| "function".to_string());

        let function = tool.name.map(|name| canonical::CanonicalFunctionDef {
            name,
            description: tool.description,
            parameters: tool.input_schema,
            strict: None,
        });

        Self {
            tool_type,
            function,
            raw: tool.raw,
        }
    }
}

impl From<anthropic::ToolChoice> for canonical::CanonicalToolChoice {
    fn from(choice: anthropic::ToolChoice) -> Self {
        match choice {
            anthropic::ToolChoice::Auto => canonical::CanonicalToolChoice::Auto,
            anthropic::ToolChoice::Any => canonical::CanonicalToolChoice::Required,
            anthropic::ToolChoice::Tool { name } => canonical::CanonicalToolChoice::Specific(name),
        }
    }
}

impl From<anthropic::StopReason> for canonical::CanonicalFinishReason {
    fn from(reason: anthropic::StopReason) -> Self {
        match reason {
            anthropic::StopReason::EndTurn => canonical::CanonicalFinishReason::Stop,
            anthropic::StopReason::MaxTokens => canonical::CanonicalFinishReason::Length,
            anthropic::StopReason::StopSequence => canonical::CanonicalFinishReason::Stop,
            anthropic::StopReason::ToolUse => canonical::CanonicalFinishReason::ToolCalls,
            anthropic::StopReason::Refusal => canonical::CanonicalFinishReason::ContentFilter,
            anthropic::StopReason::Other(reason) => {
                log::warn!("Unknown Anthropic stop reason: {reason}");
                canonical::CanonicalFinishReason::Stop
            }
        }
    }
}

impl From<anthropic::Usage> for canonical::UsageBreakdown {
    fn from(usage: anthropic::Usage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
            reasoning_tokens: None,
        }
    }
}

impl From<anthropic::ChatResponse> for canonical::CanonicalResponse {
    fn from(resp: anthropic::ChatResponse) -> Self {
        // Concatenate every text block into the message content.
        let text: String = resp
            .content
            .iter()
            .filter_map(|block| match block {
                anthropic::ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();

        // Collect tool_use blocks into canonical tool calls.
        let tool_calls: Vec<canonical::CanonicalToolCall> = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                anthropic::ContentBlock::ToolUse { id, name, input } => Some(canonical::CanonicalToolCall {
                    id: Some(id),
                    name,
                    arguments: serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string()),
                }),
                _ => None,
            })
            .collect();

        let mut finish_reason = resp
            .stop_reason
            .map(canonical::CanonicalFinishReason::from)
            .unwrap_or(canonical::CanonicalFinishReason::Stop);

        // Any tool calls force the tool_calls finish reason regardless of
        // what the upstream reported.
        if !tool_calls.is_empty() {
            finish_reason = canonical::CanonicalFinishReason::ToolCalls;
        }

        let message = canonical::CanonicalMessage {
            role: canonical::CanonicalRole::Assistant,
            content: (!text.is_empty()).then_some(text),
            content_blocks: None,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            cache_control: None,
        };

        Self {
            id: resp.id,
            model: resp.model,
            created: now_unix(),
            choices: vec![canonical::CanonicalChoice {
                index: 0,
                message,
                finish_reason: Some(finish_reason),
            }],
            usage: canonical::UsageBreakdown::from(resp.usage),
        }
    }
}

pub(crate) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_results_become_tool_messages() {
        let request: anthropic::ChatRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 1024,
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_01", "content": [
                        {"type": "text", "text": "42 files"}
                    ]},
                    {"type": "text", "text": "what next?"}
                ]}
            ]
        }))
        .unwrap();

        let canonical = canonical::CanonicalRequest::from(request);

        assert_eq!(canonical.messages.len(), 2);
        assert_eq!(canonical.messages[0].role, canonical::CanonicalRole::Tool);
        assert_eq!(canonical.messages[0].tool_call_id.as_deref(), Some("toolu_01"));
        assert_eq!(canonical.messages[0].content.as_deref(), Some("42 files"));
        assert_eq!(canonical.messages[1].role, canonical::CanonicalRole::User);
    }

    #[test]
    fn tool_use_blocks_force_the_tool_calls_finish_reason() {
        let response: anthropic::ChatResponse = serde_json::from_value(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_01", "name": "lookup", "input": {"q": "rust"}}
            ],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 10, "output_tokens": 20}
        }))
        .unwrap();

        let canonical = canonical::CanonicalResponse::from(response);
        let choice = &canonical.choices[0];

        assert_eq!(choice.finish_reason, Some(canonical::CanonicalFinishReason::ToolCalls));

        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "lookup");

        // Arguments are valid JSON.
        let parsed: Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(parsed, json!({"q": "rust"}));
    }

    #[test]
    fn no_tool_use_means_no_tool_calls_and_a_plain_stop() {
        let response: anthropic::ChatResponse = serde_json::from_value(json!({
            "id": "msg_02",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "Done."}],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }))
        .unwrap();

        let canonical = canonical::CanonicalResponse::from(response);
        let choice = &canonical.choices[0];

        assert_eq!(choice.finish_reason, Some(canonical::CanonicalFinishReason::Stop));
        assert!(choice.message.tool_calls.is_none());
    }

    #[test]
    fn cache_usage_propagates_into_the_breakdown() {
        let usage: anthropic::Usage = serde_json::from_value(json!({
            "input_tokens": 100,
            "output_tokens": 50,
            "cache_creation_input_tokens": 30,
            "cache_read_input_tokens": 60
        }))
        .unwrap();

        let breakdown = canonical::UsageBreakdown::from(usage);

        assert_eq!(breakdown.prompt_tokens, 100);
        assert_eq!(breakdown.total_tokens, 150);
        assert_eq!(breakdown.cache_creation_input_tokens, Some(30));
        assert_eq!(breakdown.cache_read_input_tokens, Some(60));
    }
}
