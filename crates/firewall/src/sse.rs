//! Streaming detokenization buffer.
//!
//! A PII token can be split across any number of streamed chunks. This
//! buffer splices the stream back together just enough to recognize
//! `[TYPE_hash]` sequences, substitute the stored original, and pass every
//! other character through untouched and in order.

use std::{
    sync::{Arc, LazyLock},
    time::{Duration, Instant},
};

use config::SseBufferConfig;
use regex::Regex;

use crate::tokenizer::Tokenizer;

/// Candidate token shape on the wire.
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[A-Z][A-Z0-9_]*_[A-Za-z0-9]+\]$").expect("valid token regex"));

/// Stateful stream rewriter sitting between the adapter's chunk producer
/// and the client writer.
///
/// Disabled (pure passthrough) unless both a tokenizer and a non-empty
/// session are present. The buffer holds at most one bracketed candidate;
/// the length and age limits guarantee malformed bracketed text cannot
/// stall the stream.
pub struct SsePiiBuffer {
    tokenizer: Option<Arc<Tokenizer>>,
    session_id: String,
    max_buffer_length: usize,
    buffer_timeout: Duration,
    buffer: String,
    buffer_chars: usize,
    inside: bool,
    entered_at: Option<Instant>,
}

impl SsePiiBuffer {
    /// Create a buffer for one streamed response.
    pub fn new(tokenizer: Option<Arc<Tokenizer>>, session_id: impl Into<String>, config: &SseBufferConfig) -> Self {
        Self {
            tokenizer,
            session_id: session_id.into(),
            max_buffer_length: config.max_buffer_length,
            buffer_timeout: config.buffer_timeout,
            buffer: String::new(),
            buffer_chars: 0,
            inside: false,
            entered_at: None,
        }
    }

    fn enabled(&self) -> bool {
        self.tokenizer.is_some() && !self.session_id.is_empty()
    }

    /// Process one chunk, returning the bytes safe to emit now.
    pub async fn process_chunk(&mut self, chunk: &str) -> String {
        if !self.enabled() {
            return chunk.to_string();
        }

        let mut output = String::with_capacity(chunk.len());

        for c in chunk.chars() {
            if !self.inside {
                if c == '[' {
                    self.inside = true;
                    self.buffer.push('[');
                    self.buffer_chars = 1;
                    self.entered_at = Some(Instant::now());
                } else {
                    output.push(c);
                }
                continue;
            }

            match c {
                ']' => {
                    self.buffer.push(']');
                    output.push_str(&self.resolve_buffer().await);
                    self.reset();
                }
                '[' => {
                    // Nested open bracket: whatever we held was not a
                    // token. Emit it and restart on the new bracket.
                    output.push_str(&self.buffer);
                    self.buffer.clear();
                    self.buffer.push('[');
                    self.buffer_chars = 1;
                    self.entered_at = Some(Instant::now());
                }
                _ => {
                    self.buffer.push(c);
                    self.buffer_chars += 1;

                    let too_long = self.buffer_chars > self.max_buffer_length;
                    let too_old = self
                        .entered_at
                        .is_some_and(|entered| entered.elapsed() > self.buffer_timeout);

                    if too_long || too_old {
                        output.push_str(&self.buffer);
                        self.reset();
                    }
                }
            }
        }

        output
    }

    /// Drain any residual buffer at stream end, attempting one last
    /// detokenization.
    pub async fn flush(&mut self) -> String {
        if self.buffer.is_empty() {
            return String::new();
        }

        let output = if TOKEN_REGEX.is_match(&self.buffer) {
            self.resolve_buffer().await
        } else {
            std::mem::take(&mut self.buffer)
        };

        self.reset();
        output
    }

    /// The buffered candidate, detokenized when it is a known token and
    /// verbatim otherwise.
    async fn resolve_buffer(&mut self) -> String {
        if !TOKEN_REGEX.is_match(&self.buffer) {
            return std::mem::take(&mut self.buffer);
        }

        let Some(tokenizer) = &self.tokenizer else {
            return std::mem::take(&mut self.buffer);
        };

        match tokenizer.detokenize(&self.session_id, &self.buffer).await {
            Some(original) => {
                self.buffer.clear();
                original
            }
            // Unknown token: pass through verbatim.
            None => std::mem::take(&mut self.buffer),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_chars = 0;
        self.inside = false;
        self.entered_at = None;
    }
}
