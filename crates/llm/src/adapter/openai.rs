//! OpenAI chat and embeddings adapters.

use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    adapter::{CHUNK_CHANNEL_CAPACITY, ChatStream},
    error::{GatewayError, upstream_message},
    http_client::upstream_client,
    messages::{
        canonical::{CanonicalChunk, CanonicalRequest, CanonicalResponse},
        openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, EmbeddingsRequest, EmbeddingsResponse},
    },
    request::RequestContext,
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";
const VENDOR: &str = "openai";

/// Chat completions against an OpenAI-compatible upstream.
///
/// This adapter forwards the canonical request largely unchanged; the
/// canonical schema and the OpenAI dialect are close relatives.
pub(crate) struct OpenAiChatAdapter {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    organization: Option<String>,
}

impl OpenAiChatAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: upstream_client(config.timeout),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string()),
            api_key: config.api_key.clone(),
            organization: config.organization.clone(),
        }
    }

    fn request_builder(&self, url: &str) -> crate::Result<reqwest::RequestBuilder> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| GatewayError::Internal(Some("no API key configured for openai".to_string())))?;

        let mut builder = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
            .header("Content-Type", "application/json");

        if let Some(organization) = &self.organization {
            builder = builder.header("OpenAI-Organization", organization.clone());
        }

        Ok(builder)
    }

    pub async fn chat(&self, request: CanonicalRequest, context: &RequestContext) -> crate::Result<CanonicalResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut openai_request = ChatCompletionRequest::from(request);
        openai_request.stream = None;

        let body = sonic_rs::to_vec(&openai_request).map_err(|e| {
            log::error!("Failed to serialize OpenAI request: {e}");
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
                "OpenAI API error ({status}) for request {}: {error_text}",
                context.request_id
            );

            return Err(GatewayError::Upstream {
                vendor: VENDOR,
                message: upstream_message(status.as_u16(), &error_text),
            });
        }

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read OpenAI response body: {e}");
            GatewayError::Internal(None)
        })?;

        let openai_response: ChatCompletionResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse OpenAI chat completion response: {e}");
            GatewayError::Connection {
                vendor: VENDOR,
                message: format!("decode error: {e}"),
            }
        })?;

        Ok(CanonicalResponse::from(openai_response))
    }

    pub async fn chat_stream(
        &self,
        request: CanonicalRequest,
        context: &RequestContext,
    ) -> crate::Result<ChatStream> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut openai_request = ChatCompletionRequest::from(request);
        openai_request.stream = Some(true);

        let body = sonic_rs::to_vec(&openai_request).map_err(|e| {
            log::error!("Failed to serialize OpenAI streaming request: {e}");
            GatewayError::Internal(None)
        })?;

        let response = self
            .request_builder(&url)?
            .header("Accept", "text/event-stream")
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
                "OpenAI streaming API error ({status}) for request {}: {error_text}",
                context.request_id
            );

            return Err(GatewayError::Upstream {
                vendor: VENDOR,
                message: upstream_message(status.as_u16(), &error_text),
            });
        }

        let (sender, receiver) = tokio::sync::mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let mut events = response.bytes_stream().eventsource();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        log::warn!("SSE parsing error in OpenAI stream: {e}");
                        continue;
                    }
                };

                if event.data == "[DONE]" {
                    break;
                }

                let Ok(chunk) = sonic_rs::from_str::<ChatCompletionChunk>(&event.data) else {
                    log::warn!("Failed to parse OpenAI streaming chunk");
                    continue;
                };

                // A send error means the client went away; stop reading.
                if sender.send(Ok(CanonicalChunk::from(chunk))).await.is_err() {
                    break;
                }
            }
        });

        Ok(receiver)
    }
}

/// Embeddings against an OpenAI-compatible upstream. A thin passthrough.
pub(crate) struct OpenAiEmbeddingsAdapter {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OpenAiEmbeddingsAdapter {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: upstream_client(config.timeout),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string()),
            api_key: config.api_key.clone(),
        }
    }

    pub async fn embeddings(
        &self,
        request: EmbeddingsRequest,
        context: &RequestContext,
    ) -> crate::Result<EmbeddingsResponse> {
        if request.input.is_null() {
            return Err(GatewayError::Validation("embeddings input must not be null".to_string()));
        }

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| GatewayError::Internal(Some("no API key configured for openai".to_string())))?;

        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()))
            .json(&request)
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
                "OpenAI embeddings API error ({status}) for request {}: {error_text}",
                context.request_id
            );

            return Err(GatewayError::Upstream {
                vendor: VENDOR,
                message: upstream_message(status.as_u16(), &error_text),
            });
        }

        response.json().await.map_err(|e| GatewayError::Connection {
            vendor: VENDOR,
            message: format!("decode error: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::messages::canonical::{CanonicalMessage, CanonicalRole};

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    fn provider_config(base_url: &str) -> ProviderConfig {
        toml::from_str(&format!("type = \"openai\"\napi_key = \"sk-test\"\nbase_url = \"{base_url}\""))
            .unwrap()
    }

    fn chat_request(content: &str) -> CanonicalRequest {
        CanonicalRequest {
            model: "gpt-4o".to_string(),
            messages: vec![CanonicalMessage::text(CanonicalRole::User, content)],
            system: None,
            max_tokens: Some(64),
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
        }
    }

    #[tokio::test]
    async fn chat_round_trips_through_the_wire_format() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "gpt-4o");
                assert_eq!(body["messages"][0]["content"], "hello");

                Json(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "gpt-4o",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "hi there"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
                }))
            }),
        ))
        .await;

        let adapter = OpenAiChatAdapter::new(&provider_config(&base));
        let response = adapter.chat(chat_request("hello"), &RequestContext::default()).await.unwrap();

        assert_eq!(response.choices[0].message.content.as_deref(), Some("hi there"));
        assert_eq!(response.usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn upstream_errors_surface_as_single_lines() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    Json(json!({
                        "error": {"message": "The model does not exist", "type": "invalid_request_error", "code": "model_not_found"}
                    })),
                )
            }),
        ))
        .await;

        let adapter = OpenAiChatAdapter::new(&provider_config(&base));
        let error = adapter.chat(chat_request("x"), &RequestContext::default()).await.unwrap_err();

        assert_eq!(
            error.to_string(),
            "openai: The model does not exist (type=invalid_request_error, code=model_not_found)"
        );
    }

    #[tokio::test]
    async fn streaming_terminates_on_done_marker() {
        let base = serve(Router::new().route(
            "/chat/completions",
            post(|| async {
                let body = concat!(
                    "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
                    "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
                    "data: {\"id\":\"c1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                    "data: [DONE]\n\n",
                );

                (
                    [("content-type", "text/event-stream")],
                    body,
                )
            }),
        ))
        .await;

        let adapter = OpenAiChatAdapter::new(&provider_config(&base));
        let mut stream = adapter
            .chat_stream(chat_request("hello"), &RequestContext::default())
            .await
            .unwrap();

        let mut text = String::new();
        let mut finish = None;

        while let Some(chunk) = stream.recv().await {
            let chunk = chunk.unwrap();

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }
                if choice.finish_reason.is_some() {
                    finish = choice.finish_reason;
                }
            }
        }

        assert_eq!(text, "Hello");
        assert_eq!(finish, Some(crate::messages::canonical::CanonicalFinishReason::Stop));
    }

    #[tokio::test]
    async fn embeddings_validates_and_passes_through() {
        let base = serve(Router::new().route(
            "/embeddings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["input"], json!(["hello"]));

                Json(json!({
                    "object": "list",
                    "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}],
                    "model": "text-embedding-3-small",
                    "usage": {"prompt_tokens": 1, "total_tokens": 1}
                }))
            }),
        ))
        .await;

        let adapter = OpenAiEmbeddingsAdapter::new(&provider_config(&base));

        let response = adapter
            .embeddings(
                EmbeddingsRequest {
                    model: "text-embedding-3-small".to_string(),
                    input: json!(["hello"]),
                    encoding_format: None,
                    dimensions: None,
                    user: None,
                },
                &RequestContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.data.len(), 1);

        // Null input never reaches the upstream.
        let error = adapter
            .embeddings(
                EmbeddingsRequest {
                    model: "text-embedding-3-small".to_string(),
                    input: Value::Null,
                    encoding_format: None,
                    dimensions: None,
                    user: None,
                },
                &RequestContext::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::Validation(_)));
    }
}
