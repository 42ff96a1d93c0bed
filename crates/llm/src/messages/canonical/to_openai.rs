//! Conversions from canonical types to OpenAI protocol types.

use crate::messages::{canonical, openai};

impl From<canonical::CanonicalRequest> for openai::ChatCompletionRequest {
    fn from(req: canonical::CanonicalRequest) -> Self {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);

        // The system prompt travels as a leading system message on this
        // dialect.
        if let Some(system) = req.system {
            messages.push(openai::ChatMessage {
                role: openai::ChatRole::System,
                content: Some(openai::MessageContent::Text(system)),
                tool_calls: None,
                tool_call_id: None,
                cache_control: None,
            });
        }

        messages.extend(req.messages.into_iter().map(openai::ChatMessage::from));

        Self {
            model: req.model,
            messages,
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            max_completion_tokens: req.max_completion_tokens,
            stream: req.stream,
            stop: req.stop_sequences,
            tools: req.tools.map(|tools| tools.into_iter().map(openai::Tool::from).collect()),
            tool_choice: req.tool_choice.map(openai::ToolChoice::from),
            parallel_tool_calls: req.parallel_tool_calls,
            response_format: req.response_format,
            reasoning_effort: req.reasoning_effort,
            thinking: req.thinking.map(|thinking| openai::ThinkingConfig {
                thinking_type: thinking.thinking_type,
                budget_tokens: thinking.budget_tokens,
            }),
            web_search_options: req.web_search_options,
            user: req.user,
            metadata: req.metadata,
        }
    }
}

impl From<canonical::CanonicalRole> for openai::ChatRole {
    fn from(role: canonical::CanonicalRole) -> Self {
        match role {
            canonical::CanonicalRole::System => openai::ChatRole::System,
            canonical::CanonicalRole::User => openai::ChatRole::User,
            canonical::CanonicalRole::Assistant => openai::ChatRole::Assistant,
            canonical::CanonicalRole::Tool => openai::ChatRole::Tool,
        }
    }
}

impl From<canonical::CanonicalMessage> for openai::ChatMessage {
    fn from(msg: canonical::CanonicalMessage) -> Self {
        let content = match (msg.content, msg.content_blocks) {
            (Some(text), None) => Some(openai::MessageContent::Text(text)),
            (text, Some(blocks)) => {
                let mut parts: Vec<openai::ContentPart> = Vec::with_capacity(blocks.len() + 1);

                if let Some(text) = text {
                    parts.push(openai::ContentPart::Text { text });
                }

                parts.extend(blocks.into_iter().map(openai::ContentPart::from));
                Some(openai::MessageContent::Parts(parts))
            }
            (None, None) => None,
        };

        let tool_calls = msg.tool_calls.map(|calls| {
            calls
                .into_iter()
                .map(|call| openai::ToolCall {
                    id: call.id,
                    call_type: Some("function".to_string()),
                    function: openai::FunctionCall {
                        name: call.name,
                        arguments: call.arguments,
                    },
                })
                .collect()
        });

        Self {
            role: openai::ChatRole::from(msg.role),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id,
            cache_control: msg.cache_control,
        }
    }
}

impl From<canonical::CanonicalContentBlock> for openai::ContentPart {
    fn from(block: canonical::CanonicalContentBlock) -> Self {
        match block {
            canonical::CanonicalContentBlock::Text { text } => openai::ContentPart::Text { text },
            canonical::CanonicalContentBlock::Image { source } => openai::ContentPart::ImageUrl { image_url: source },
            canonical::CanonicalContentBlock::InputJson { data } => openai::ContentPart::InputJson { data },
        }
    }
}

impl From<canonical::CanonicalTool> for openai::Tool {
    fn from(tool: canonical::CanonicalTool) -> Self {
        Self {
            tool_type: tool.tool_type,
            function: tool.function.map(|function| openai::FunctionDef {
                name: function.name,
                description: function.description,
                parameters: function.parameters,
                strict: function.strict,
            }),
            raw: tool.raw,
        }
    }
}

impl From<canonical::CanonicalToolChoice> for openai::ToolChoice {
    fn from(choice: canonical::CanonicalToolChoice) -> Self {
        match choice {
            canonical::CanonicalToolChoice::Auto => openai::ToolChoice::Mode(openai::ToolChoiceMode::Auto),
            canonical::CanonicalToolChoice::None => openai::ToolChoice::Mode(openai::ToolChoiceMode::None),
            canonical::CanonicalToolChoice::Required => openai::ToolChoice::Mode(openai::ToolChoiceMode::Required),
            canonical::CanonicalToolChoice::Specific(name) => openai::ToolChoice::Specific {
                choice_type: "function".to_string(),
                function: openai::FunctionChoice { name },
            },
        }
    }
}

impl From<canonical::CanonicalFinishReason> for openai::FinishReason {
    fn from(reason: canonical::CanonicalFinishReason) -> Self {
        match reason {
            canonical::CanonicalFinishReason::Stop => openai::FinishReason::Stop,
            canonical::CanonicalFinishReason::Length => openai::FinishReason::Length,
            canonical::CanonicalFinishReason::ToolCalls => openai::FinishReason::ToolCalls,
            canonical::CanonicalFinishReason::ContentFilter => openai::FinishReason::ContentFilter,
        }
    }
}

impl From<canonical::UsageBreakdown> for openai::Usage {
    fn from(usage: canonical::UsageBreakdown) -> Self {
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

impl From<canonical::CanonicalResponse> for openai::ChatCompletionResponse {
    fn from(resp: canonical::CanonicalResponse) -> Self {
        Self {
            id: resp.id,
            object: "chat.completion".to_string(),
            created: resp.created,
            model: resp.model,
            choices: resp
                .choices
                .into_iter()
                .map(|choice| openai::ChatChoice {
                    index: choice.index,
                    message: openai::ChatMessage::from(choice.message),
                    finish_reason: choice.finish_reason.map(openai::FinishReason::from),
                })
                .collect(),
            usage: openai::Usage::from(resp.usage),
        }
    }
}

impl From<canonical::CanonicalChunk> for openai::ChatCompletionChunk {
    fn from(chunk: canonical::CanonicalChunk) -> Self {
        Self {
            id: chunk.id,
            object: "chat.completion.chunk".to_string(),
            created: chunk.created,
            model: chunk.model,
            choices: chunk
                .choices
                .into_iter()
                .map(|choice| openai::ChatChoiceDelta {
                    index: choice.index,
                    delta: openai::ChatMessageDelta {
                        role: choice.delta.role.map(openai::ChatRole::from),
                        content: choice.delta.content,
                        tool_calls: choice.delta.tool_calls.map(|calls| {
                            calls
                                .into_iter()
                                .map(|call| openai::ToolCallDelta {
                                    index: call.index,
                                    id: call.id,
                                    call_type: call.call_type,
                                    function: Some(openai::FunctionDelta {
                                        name: call.name,
                                        arguments: call.arguments,
                                    }),
                                })
                                .collect()
                        }),
                    },
                    finish_reason: choice.finish_reason.map(openai::FinishReason::from),
                })
                .collect(),
            usage: chunk.usage.map(openai::Usage::from),
        }
    }
}
