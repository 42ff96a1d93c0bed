//! Vendor adapters.
//!
//! The adapter set is closed at build time: OpenAI chat, Anthropic chat
//! and OpenAI embeddings. Each adapter converts a canonical request into
//! its vendor's wire format, performs the HTTP call, and converts the
//! response (or SSE stream) back into canonical chunks.

pub(crate) mod anthropic;
pub(crate) mod openai;

use crate::{
    error::GatewayError,
    messages::{canonical::CanonicalChunk, canonical::CanonicalRequest, canonical::CanonicalResponse, openai as openai_messages},
    request::RequestContext,
};

/// Bounded channel between the adapter's chunk producer and the ingress
/// writer. A stalled client suspends the producer on send; a disconnected
/// client drops the receiver, which unblocks and ends the producer.
pub(crate) const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Stream of canonical chunks produced by an adapter.
pub(crate) type ChatStream = tokio::sync::mpsc::Receiver<crate::Result<CanonicalChunk>>;

/// The closed set of vendor adapters.
pub(crate) enum Adapter {
    OpenAiChat(openai::OpenAiChatAdapter),
    AnthropicChat(anthropic::AnthropicChatAdapter),
    OpenAiEmbeddings(openai::OpenAiEmbeddingsAdapter),
}

impl Adapter {
    /// Perform a non-streaming chat completion.
    pub async fn chat(&self, request: CanonicalRequest, context: &RequestContext) -> crate::Result<CanonicalResponse> {
        match self {
            Adapter::OpenAiChat(adapter) => adapter.chat(request, context).await,
            Adapter::AnthropicChat(adapter) => adapter.chat(request, context).await,
            Adapter::OpenAiEmbeddings(_) => Err(GatewayError::Validation(
                "embeddings adapter cannot serve chat".to_string(),
            )),
        }
    }

    /// Open a streaming chat completion.
    pub async fn chat_stream(&self, request: CanonicalRequest, context: &RequestContext) -> crate::Result<ChatStream> {
        match self {
            Adapter::OpenAiChat(adapter) => adapter.chat_stream(request, context).await,
            Adapter::AnthropicChat(adapter) => adapter.chat_stream(request, context).await,
            Adapter::OpenAiEmbeddings(_) => Err(GatewayError::Validation(
                "embeddings adapter cannot serve chat".to_string(),
            )),
        }
    }

    /// Perform an embeddings request.
    pub async fn embeddings(
        &self,
        request: openai_messages::EmbeddingsRequest,
        context: &RequestContext,
    ) -> crate::Result<openai_messages::EmbeddingsResponse> {
        match self {
            Adapter::OpenAiEmbeddings(adapter) => adapter.embeddings(request, context).await,
            _ => Err(GatewayError::Validation(
                "chat adapter cannot serve embeddings".to_string(),
            )),
        }
    }
}
