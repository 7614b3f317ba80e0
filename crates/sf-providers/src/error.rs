//! Provider error types.

use sf_protocol::ResourceKind;
use thiserror::Error;

/// Errors returned by infrastructure providers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Provider-side validation failure. Not retried automatically.
    #[error("provider rejected operation: {0}")]
    Rejected(String),

    #[error("provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("no provider handles {0} resources")]
    Unsupported(ResourceKind),
}

impl ProviderError {
    /// Taxonomy kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Rejected(_) | ProviderError::Unsupported(_) => "provider_rejected",
            ProviderError::Timeout { .. } => "provider_timeout",
            ProviderError::Unavailable(_) => "provider_unavailable",
        }
    }
}

/// Convenience alias for provider results.
pub type ProviderResult<T> = Result<T, ProviderError>;
