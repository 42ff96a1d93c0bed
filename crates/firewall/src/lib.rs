//! Content firewall for the gateway hot path.
//!
//! The firewall sits between ingress and the vendor adapters. On the way
//! in, an ordered chain of filters inspects the request body, records
//! detections and, in redact mode, replaces PII with stable synthetic
//! tokens. On the way out, the substitution is reversed, including across
//! the chunk boundaries of a streaming response.
//!
//! The pieces, leaves first:
//!
//! - [`store`]: keyed token maps with session TTL (in-process or redis).
//! - [`Tokenizer`]: type-shaped token minting and reversal.
//! - [`FirewallPipeline`]: priority-ordered filter execution under one of
//!   four operating modes.
//! - [`filters`]: the built-in regex PII filter and the external HTTP
//!   filter adapter.
//! - [`SsePiiBuffer`]: the streaming detokenizer.

mod context;
mod error;
pub mod filters;
mod patterns;
mod pipeline;
mod sse;
pub mod store;
mod tokenizer;

pub use config::FirewallMode;
pub use context::{Detection, FilterContext};
pub use error::FirewallError;
pub use patterns::{CompiledPattern, PatternCatalogue};
pub use pipeline::{Filter, FilterDirection, FirewallPipeline};
pub use sse::SsePiiBuffer;
pub use store::{MemoryTokenStore, PiiToken, PiiType, RedisTokenStore, TokenStore};
pub use tokenizer::Tokenizer;

/// Convenience result alias for firewall operations.
pub type Result<T> = std::result::Result<T, FirewallError>;
