//! Conversions from OpenAI protocol types to canonical types.

use crate::messages::{canonical, openai};

impl From<openai::ChatCompletionRequest> for canonical::CanonicalRequest {
    fn from(req: openai::ChatCompletionRequest) -> Self {
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(req.messages.len());

        for msg in req.messages {
            if msg.role == openai::ChatRole::System {
                if let Some(content) = msg.content {
                    system_parts.push(content.text());
                }
            } else {
                messages.push(canonical::CanonicalMessage::from(msg));
            }
        }

        // Order-preserving newline join of every system message.
        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n"))
        };

        Self {
            model: req.model,
            messages,
            system,
            max_tokens: req.max_tokens,
            max_completion_tokens: req.max_completion_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop_sequences: req.stop,
            stream: req.stream,
            tools: req
                .tools
                .map(|tools| tools.into_iter().map(canonical::CanonicalTool::from).collect()),
            tool_choice: req.tool_choice.map(canonical::CanonicalToolChoice::from),
            parallel_tool_calls: req.parallel_tool_calls,
            response_format: req.response_format,
            reasoning_effort: req.reasoning_effort,
            thinking: req.thinking.map(canonical::ThinkingConfig::from),
            web_search_options: req.web_search_options,
            user: req.user,
            metadata: req.metadata,
        }
    }
}

impl From<openai::ThinkingConfig> for canonical::ThinkingConfig {
    fn from(thinking: openai::ThinkingConfig) -> Self {
        Self {
            thinking_type: thinking.thinking_type,
            budget_tokens: thinking.budget_tokens,
        }
    }
}

impl From<openai::ChatRole> for canonical::CanonicalRole {
    fn from(role: openai::ChatRole) -> Self {
        match role {
            openai::ChatRole::System => canonical::CanonicalRole::System,
            openai::ChatRole::User => canonical::CanonicalRole::User,
            openai::ChatRole::Assistant => canonical::CanonicalRole::Assistant,
            openai::ChatRole::Tool => canonical::CanonicalRole::Tool,
        }
    }
}

impl From<openai::ChatMessage> for canonical::CanonicalMessage {
    fn from(msg: openai::ChatMessage) -> Self {
        let (content, content_blocks) = match msg.content {
            Some(openai::MessageContent::Text(text)) => (Some(text), None),
            Some(openai::MessageContent::Parts(parts)) => {
                let blocks = parts.into_iter().map(canonical::CanonicalContentBlock::from).collect();
                (None, Some(blocks))
            }
            None => (None, None),
        };

        let tool_calls = msg.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| canonical::CanonicalToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect()
        });

        Self {
            role: canonical::CanonicalRole::from(msg.role),
            content,
            content_blocks,
            tool_calls,
            tool_call_id: msg.tool_call_id,
            cache_control: msg.cache_control,
        }
    }
}

impl From<openai::ContentPart> for canonical::CanonicalContentBlock {
    fn from(part: openai::ContentPart) -> Self {
        match part {
            openai::ContentPart::Text { text } => canonical::CanonicalContentBlock::Text { text },
            openai::ContentPart::ImageUrl { image_url } => canonical::CanonicalContentBlock::Image { source: image_url },
            openai::ContentPart::InputJson { data } => canonical::CanonicalContentBlock::InputJson { data },
        }
    }
}

impl From<openai::Tool> for canonical::CanonicalTool {
    fn from(tool: openai::Tool) -> Self {
        Self {
            tool_type: tool.tool_type,
            function: tool.function.map(|function| canonical::CanonicalFunctionDef {
                name: function.name,
                description: function.description,
                parameters: function.parameters,
                strict: function.strict,
            }),
            raw: tool.raw,
        }
    }
}

impl From<openai::ToolChoice> for canonical::CanonicalToolChoice {
    fn from(choice: openai::ToolChoice) -> Self {
        match choice {
            openai::ToolChoice::Mode(openai::ToolChoiceMode::None) => canonical::CanonicalToolChoice::None,
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto) => canonical::CanonicalToolChoice::Auto,
            openai::ToolChoice::Mode(openai::ToolChoiceMode::Required | openai::ToolChoiceMode::Any) => {
                canonical::CanonicalToolChoice::Required
            }
            openai::ToolChoice::Specific { function, .. } => canonical::CanonicalToolChoice::Specific(function.name),
            // Legacy boolean form: true forces tool use, false is auto.
            openai::ToolChoice::Legacy(true) => canonical::CanonicalToolChoice::Required,
            openai::ToolChoice::Legacy(false) => canonical::CanonicalToolChoice::Auto,
        }
    }
}

impl From<openai::FinishReason> for canonical::CanonicalFinishReason {
    fn from(reason: openai::FinishReason) -> Self {
        match reason {
            openai::FinishReason::Stop => canonical::CanonicalFinishReason::Stop,
            openai::FinishReason::Length => canonical::CanonicalFinishReason::Length,
            openai::FinishReason::ToolCalls => canonical::CanonicalFinishReason::ToolCalls,
            openai::FinishReason::ContentFilter => canonical::CanonicalFinishReason::ContentFilter,
        }
    }
}

impl From<openai::Usage> for canonical::UsageBreakdown {
    fn from(usage: openai::Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
            reasoning_tokens: usage.reasoning_tokens,
        }
    }
}

impl From<openai::ChatCompletionResponse> for canonical::CanonicalResponse {
    fn from(resp: openai::ChatCompletionResponse) -> Self {
        Self {
            id: resp.id,
            model: resp.model,
            created: resp.created,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| canonical::CanonicalChoice {
                    index: choice.index,
                    message: canonical::CanonicalMessage::from(choice.message),
                    finish_reason: choice.finish_reason.map(canonical::CanonicalFinishReason::from),
                })
                .collect(),
            usage: canonical::UsageBreakdown::from(resp.usage),
        }
    }
}

impl From<openai::ChatCompletionChunk> for canonical::CanonicalChunk {
    fn from(chunk: openai::ChatCompletionChunk) -> Self {
        Self {
            id: chunk.id,
            model: chunk.model,
            created: chunk.created,
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| canonical::CanonicalChoiceDelta {
                    index: choice.index,
                    delta: canonical::CanonicalDelta {
                        role: choice.delta.role.map(canonical::CanonicalRole::from),
                        content: choice.delta.content,
                        tool_calls: choice.delta.tool_calls.map(|calls| {
                            calls
                                .into_iter()
                                .map(|call| canonical::CanonicalToolCallDelta {
                                    index: call.index,
                                    id: call.id,
                                    call_type: call.call_type,
                                    name: call.function.as_ref().and_then(|f| f.name.clone()),
                                    arguments: call.function.and_then(|f| f.arguments),
                                })
                                .collect()
                        }),
                    },
                    finish_reason: choice.finish_reason.map(canonical::CanonicalFinishReason::from),
                })
                .collect(),
            usage: chunk.usage.map(canonical::UsageBreakdown::from),
        }
    }
}
