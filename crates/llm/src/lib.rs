//! LLM request gateway: ingress surfaces, the firewall hook points and
//! the vendor adapters.
//!
//! Requests arrive in one vendor dialect (OpenAI or Anthropic), pass
//! through the content firewall, and are dispatched to an upstream that
//! may speak a different dialect. Streamed responses are detokenized
//! chunk by chunk through the SSE PII buffer on their way out.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderMap, header::CONTENT_TYPE},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use config::{Config, FirewallMode, ProviderType, SseBufferConfig};
use context::Authentication;
use firewall::{
    FilterContext, FirewallError, FirewallPipeline, SsePiiBuffer, Tokenizer,
    filters::{ExternalHttpFilter, RegexPiiFilter},
    store::{MemoryTokenStore, RedisTokenStore, TokenStore},
};

mod adapter;
mod error;
mod http_client;
mod messages;
mod request;

use adapter::{Adapter, ChatStream};
pub use error::{AnthropicGatewayError, AnthropicResult, GatewayError, GatewayResult as Result};
use messages::{anthropic, canonical, openai};
use request::RequestContext;

/// Shared per-process gateway state: the firewall pipeline and the
/// configured adapters.
pub struct Gateway {
    pipeline: Arc<FirewallPipeline>,
    sse_config: SseBufferConfig,
    session_header: String,
    openai_chat: Option<Adapter>,
    anthropic_chat: Option<Adapter>,
    embeddings: Option<Adapter>,
    models: Vec<openai::Model>,
}

impl Gateway {
    /// Build the gateway from its configuration: token store, tokenizer,
    /// filter pipeline and one adapter per configured provider.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn TokenStore> = match config.firewall.store {
            config::TokenStoreBackend::Memory => {
                let store = Arc::new(MemoryTokenStore::new(config.firewall.session_ttl));
                firewall::store::spawn_cleanup(store.clone(), config.firewall.session_ttl);
                store
            }
            config::TokenStoreBackend::Redis => {
                let url = config
                    .firewall
                    .store_url
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("redis token store requires firewall.store_url"))?;

                Arc::new(
                    RedisTokenStore::connect(url.as_str(), config.firewall.store_prefix.clone(), config.firewall.session_ttl)
                        .await
                        .map_err(|e| anyhow::anyhow!("failed to connect redis token store: {e}"))?,
                )
            }
        };

        let tokenizer = Arc::new(Tokenizer::new(store));
        let pipeline = Arc::new(FirewallPipeline::new(config.firewall.mode, tokenizer));

        if let Some(regex_config) = &config.firewall.regex_filter {
            let catalogue = match &regex_config.patterns_file {
                Some(path) => firewall::PatternCatalogue::from_file(path)?,
                None => firewall::PatternCatalogue::embedded()?,
            };

            pipeline.register(Arc::new(RegexPiiFilter::new(regex_config, &catalogue)?));
            log::debug!("Registered regex PII filter at priority {}", regex_config.priority);
        }

        if let Some(external_config) = &config.firewall.external_filter {
            pipeline.register(Arc::new(ExternalHttpFilter::new(external_config)));
            log::debug!(
                "Registered external filter '{}' at priority {}",
                external_config.name,
                external_config.priority
            );
        }

        let mut openai_chat = None;
        let mut anthropic_chat = None;
        let mut embeddings = None;
        let mut models = Vec::new();

        for (name, provider) in &config.llm.providers {
            match provider.provider_type {
                ProviderType::OpenAI => {
                    openai_chat = Some(Adapter::OpenAiChat(adapter::openai::OpenAiChatAdapter::new(provider)));
                    embeddings = Some(Adapter::OpenAiEmbeddings(adapter::openai::OpenAiEmbeddingsAdapter::new(
                        provider,
                    )));
                }
                ProviderType::Anthropic => {
                    anthropic_chat = Some(Adapter::AnthropicChat(adapter::anthropic::AnthropicChatAdapter::new(
                        provider,
                    )));
                }
            }

            models.extend(provider.models.iter().map(|id| openai::Model {
                id: id.clone(),
                object: "model".to_string(),
                created: 0,
                owned_by: name.clone(),
            }));
        }

        Ok(Self {
            pipeline,
            sse_config: config.firewall.sse.clone(),
            session_header: config.firewall.session_header.clone(),
            openai_chat,
            anthropic_chat,
            embeddings,
            models,
        })
    }

    /// Pick the chat adapter for a request: models with a `claude` prefix
    /// prefer the Anthropic upstream, everything else prefers OpenAI,
    /// falling back to whichever is configured.
    fn chat_adapter(&self, model: &str) -> Result<&Adapter> {
        let preferred = if model.starts_with("claude") {
            self.anthropic_chat.as_ref().or(self.openai_chat.as_ref())
        } else {
            self.openai_chat.as_ref().or(self.anthropic_chat.as_ref())
        };

        preferred.ok_or_else(|| GatewayError::NoProvider(format!("no chat provider configured for model '{model}'")))
    }

    /// The tokenizer handle for streamed detokenization; present only in
    /// redact mode so the buffer stays a passthrough otherwise.
    fn stream_tokenizer(&self) -> Option<Arc<Tokenizer>> {
        (self.pipeline.mode() == FirewallMode::Redact).then(|| self.pipeline.tokenizer().clone())
    }

    fn filter_context(&self, body: String, model: String, endpoint: &str, context: &RequestContext) -> FilterContext {
        FilterContext {
            request_body: body,
            request_model: model,
            endpoint: endpoint.to_string(),
            user_id: context.user_id.clone(),
            tenant_id: context.tenant_id.clone(),
            session_id: context.session_id.clone(),
            ..Default::default()
        }
    }
}

fn map_firewall_error(error: FirewallError) -> GatewayError {
    match error {
        FirewallError::Blocked(reason) => GatewayError::Blocked(reason),
        other => {
            log::error!("Firewall failure: {other}");
            GatewayError::Internal(None)
        }
    }
}

/// Creates the axum router for the gateway endpoints.
pub async fn router(config: &Config) -> anyhow::Result<Router> {
    let gateway = Arc::new(Gateway::new(config).await?);
    Ok(router_with_gateway(gateway, config))
}

fn router_with_gateway(gateway: Arc<Gateway>, config: &Config) -> Router {
    let mut router = Router::new();

    if config.llm.protocols.openai_enabled {
        router = router
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/embeddings", post(embeddings_handler))
            .route("/v1/models", get(list_models));
    }

    if config.llm.protocols.anthropic_enabled {
        router = router.route("/v1/messages", post(anthropic_messages));
    }

    router.with_state(gateway)
}

/// Handle OpenAI-dialect chat completion requests.
///
/// The body is read raw so the firewall inspects exactly what the client
/// sent; the (possibly modified) body is parsed afterwards.
async fn chat_completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    authentication: Option<Extension<Authentication>>,
    body: String,
) -> Result<Response> {
    let context = request::extract_context(&headers, &gateway.session_header, authentication.as_ref().map(|ext| &ext.0));

    let preview: openai::ChatCompletionRequest = sonic_rs::from_str(&body)
        .map_err(|e| GatewayError::Validation(format!("invalid chat completion request: {e}")))?;

    log::debug!(
        "OpenAI chat request {} for model {} ({} messages, stream={})",
        context.request_id,
        preview.model,
        preview.messages.len(),
        preview.stream.unwrap_or(false)
    );

    let mut filter_context = gateway.filter_context(body, preview.model.clone(), "/v1/chat/completions", &context);

    gateway
        .pipeline
        .process_input(&mut filter_context)
        .await
        .map_err(map_firewall_error)?;

    // Re-parse from the firewall's view of the body; redaction may have
    // rewritten it.
    let request: openai::ChatCompletionRequest = sonic_rs::from_str(&filter_context.request_body)
        .map_err(|e| GatewayError::Validation(format!("invalid chat completion request after filtering: {e}")))?;

    let canonical_request = canonical::CanonicalRequest::from(request);
    canonical_request.validate()?;

    let adapter = gateway.chat_adapter(&canonical_request.model)?;

    if canonical_request.stream.unwrap_or(false) {
        let stream = adapter.chat_stream(canonical_request, &context).await?;
        let buffer = SsePiiBuffer::new(gateway.stream_tokenizer(), context.session_id.clone(), &gateway.sse_config);

        return Ok(openai_sse_response(stream, buffer));
    }

    let response = adapter.chat(canonical_request, &context).await?;
    let openai_response = openai::ChatCompletionResponse::from(response);

    let serialized = sonic_rs::to_string(&openai_response).map_err(|e| {
        log::error!("Failed to serialize chat completion response: {e}");
        GatewayError::Internal(None)
    })?;

    filter_context.response_body = Some(serialized);

    gateway
        .pipeline
        .process_output(&mut filter_context)
        .await
        .map_err(map_firewall_error)?;

    let body = filter_context.response_body.take().unwrap_or_default();

    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// Phases of a streamed response: chunks, the final buffer flush, the
/// terminal marker.
enum StreamPhase {
    Streaming,
    Flushed,
    Done,
}

struct SseState {
    stream: ChatStream,
    buffer: SsePiiBuffer,
    phase: StreamPhase,
    anthropic_dialect: bool,
    /// Chunk identity carried into the synthetic flush chunk.
    last_id: String,
    last_model: String,
    last_created: u64,
}

/// Wrap an adapter stream in the OpenAI SSE framing, running every
/// chunk's delta text through the PII buffer. Ends with `[DONE]`.
fn openai_sse_response(stream: ChatStream, buffer: SsePiiBuffer) -> Response {
    Sse::new(futures::stream::unfold(sse_state(stream, buffer, false), next_sse_event)).into_response()
}

/// Wrap an adapter stream in the Anthropic SSE framing. No terminal
/// marker on this dialect; the stream just ends after the flush.
fn anthropic_sse_response(stream: ChatStream, buffer: SsePiiBuffer) -> Response {
    Sse::new(futures::stream::unfold(sse_state(stream, buffer, true), next_sse_event)).into_response()
}

fn sse_state(stream: ChatStream, buffer: SsePiiBuffer, anthropic_dialect: bool) -> SseState {
    SseState {
        stream,
        buffer,
        phase: StreamPhase::Streaming,
        anthropic_dialect,
        last_id: String::new(),
        last_model: String::new(),
        last_created: 0,
    }
}

async fn next_sse_event(mut state: SseState) -> Option<(std::result::Result<Event, Infallible>, SseState)> {
    loop {
        match state.phase {
            StreamPhase::Streaming => match state.stream.recv().await {
                Some(Ok(mut chunk)) => {
                    state.last_id = chunk.id.clone();
                    state.last_model = chunk.model.clone();
                    state.last_created = chunk.created;

                    // Detokenize the text the client will concatenate;
                    // the wire framing around it stays untouched.
                    for choice in &mut chunk.choices {
                        if let Some(content) = choice.delta.content.take() {
                            choice.delta.content = Some(state.buffer.process_chunk(&content).await);
                        }
                    }

                    let serialized = if state.anthropic_dialect {
                        serialize_event(&anthropic::StreamEvent::from(chunk))
                    } else {
                        serialize_event(&openai::ChatCompletionChunk::from(chunk))
                    };

                    return Some((Ok(Event::default().data(serialized)), state));
                }
                Some(Err(e)) => {
                    log::error!("Stream error: {e}");

                    let payload = if state.anthropic_dialect {
                        serialize_event(&anthropic::StreamEvent::Error {
                            error: anthropic::ErrorBody {
                                r#type: e.error_type().to_string(),
                                message: e.client_message(),
                            },
                        })
                    } else {
                        format!(r#"{{"error":"{}"}}"#, e.client_message())
                    };

                    return Some((Ok(Event::default().data(payload)), state));
                }
                None => {
                    state.phase = StreamPhase::Flushed;

                    // Drain any partial token held back by the buffer.
                    let residual = state.buffer.flush().await;

                    if !residual.is_empty() {
                        let chunk = canonical::CanonicalChunk {
                            id: state.last_id.clone(),
                            model: state.last_model.clone(),
                            created: state.last_created,
                            choices: vec![canonical::CanonicalChoiceDelta {
                                index: 0,
                                delta: canonical::CanonicalDelta {
                                    role: None,
                                    content: Some(residual),
                                    tool_calls: None,
                                },
                                finish_reason: None,
                            }],
                            usage: None,
                        };

                        let serialized = if state.anthropic_dialect {
                            serialize_event(&anthropic::StreamEvent::from(chunk))
                        } else {
                            serialize_event(&openai::ChatCompletionChunk::from(chunk))
                        };

                        return Some((Ok(Event::default().data(serialized)), state));
                    }
                }
            },
            StreamPhase::Flushed => {
                state.phase = StreamPhase::Done;

                if !state.anthropic_dialect {
                    return Some((Ok(Event::default().data("[DONE]")), state));
                }
            }
            StreamPhase::Done => return None,
        }
    }
}

fn serialize_event<T: serde::Serialize>(event: &T) -> String {
    sonic_rs::to_string(event).unwrap_or_else(|e| {
        log::error!("Failed to serialize stream event: {e}");
        r#"{"error":"serialization failed"}"#.to_string()
    })
}

/// Handle OpenAI-dialect embeddings requests.
async fn embeddings_handler(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    authentication: Option<Extension<Authentication>>,
    body: String,
) -> Result<Response> {
    let context = request::extract_context(&headers, &gateway.session_header, authentication.as_ref().map(|ext| &ext.0));

    let preview: openai::EmbeddingsRequest =
        sonic_rs::from_str(&body).map_err(|e| GatewayError::Validation(format!("invalid embeddings request: {e}")))?;

    let mut filter_context = gateway.filter_context(body, preview.model.clone(), "/v1/embeddings", &context);

    gateway
        .pipeline
        .process_input(&mut filter_context)
        .await
        .map_err(map_firewall_error)?;

    let request: openai::EmbeddingsRequest = sonic_rs::from_str(&filter_context.request_body)
        .map_err(|e| GatewayError::Validation(format!("invalid embeddings request after filtering: {e}")))?;

    let adapter = gateway
        .embeddings
        .as_ref()
        .ok_or_else(|| GatewayError::NoProvider("no embeddings provider configured".to_string()))?;

    let response = adapter.embeddings(request, &context).await?;

    Ok(Json(response).into_response())
}

/// Handle model listing requests.
async fn list_models(State(gateway): State<Arc<Gateway>>) -> Result<Response> {
    let response = openai::ModelsResponse {
        object: "list".to_string(),
        data: gateway.models.clone(),
    };

    Ok(Json(response).into_response())
}

/// Handle Anthropic-dialect messages requests.
async fn anthropic_messages(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    authentication: Option<Extension<Authentication>>,
    body: String,
) -> AnthropicResult<Response> {
    let context = request::extract_context(&headers, &gateway.session_header, authentication.as_ref().map(|ext| &ext.0));

    let preview: anthropic::ChatRequest = sonic_rs::from_str(&body)
        .map_err(|e| GatewayError::Validation(format!("invalid messages request: {e}")))
        .map_err(AnthropicGatewayError::from)?;

    log::debug!(
        "Anthropic messages request {} for model {} ({} messages, stream={})",
        context.request_id,
        preview.model,
        preview.messages.len(),
        preview.stream.unwrap_or(false)
    );

    let mut filter_context = gateway.filter_context(body, preview.model.clone(), "/v1/messages", &context);

    gateway
        .pipeline
        .process_input(&mut filter_context)
        .await
        .map_err(map_firewall_error)
        .map_err(AnthropicGatewayError::from)?;

    let request: anthropic::ChatRequest = sonic_rs::from_str(&filter_context.request_body)
        .map_err(|e| GatewayError::Validation(format!("invalid messages request after filtering: {e}")))
        .map_err(AnthropicGatewayError::from)?;

    let canonical_request = canonical::CanonicalRequest::from(request);
    canonical_request.validate().map_err(AnthropicGatewayError::from)?;

    let adapter = gateway
        .chat_adapter(&canonical_request.model)
        .map_err(AnthropicGatewayError::from)?;

    if canonical_request.stream.unwrap_or(false) {
        let stream = adapter
            .chat_stream(canonical_request, &context)
            .await
            .map_err(AnthropicGatewayError::from)?;

        let buffer = SsePiiBuffer::new(gateway.stream_tokenizer(), context.session_id.clone(), &gateway.sse_config);

        return Ok(anthropic_sse_response(stream, buffer));
    }

    let response = adapter
        .chat(canonical_request, &context)
        .await
        .map_err(AnthropicGatewayError::from)?;

    let anthropic_response = anthropic::ChatResponse::from(response);

    let serialized = sonic_rs::to_string(&anthropic_response)
        .map_err(|e| {
            log::error!("Failed to serialize messages response: {e}");
            GatewayError::Internal(None)
        })
        .map_err(AnthropicGatewayError::from)?;

    filter_context.response_body = Some(serialized);

    gateway
        .pipeline
        .process_output(&mut filter_context)
        .await
        .map_err(map_firewall_error)
        .map_err(AnthropicGatewayError::from)?;

    let body = filter_context.response_body.take().unwrap_or_default();

    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}
