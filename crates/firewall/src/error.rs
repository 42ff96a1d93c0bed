use thiserror::Error;

/// Firewall errors.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// A filter refused the request. Carries the block reason for the
    /// client-facing error body.
    #[error("request blocked: {0}")]
    Blocked(String),

    /// The token store failed. The tokenizer treats this as degraded
    /// rather than fatal; it only surfaces where a caller asked the store
    /// directly.
    #[error("token store error: {0}")]
    Store(String),

    /// A filter failed for its own reasons. The pipeline logs and skips.
    #[error("filter '{name}' failed: {message}")]
    Filter {
        /// Name of the failing filter.
        name: String,
        /// Underlying failure.
        message: String,
    },

    /// The pattern catalogue could not be loaded or compiled.
    #[error("invalid pattern catalogue: {0}")]
    Patterns(String),
}
