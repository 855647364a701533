//! Error taxonomy at the model-call trait boundary.

/// Errors an [`crate::LmClient`] can raise. Every variant the driver sees is
/// recoverable by the fallback manager except [`LlmError::Cancelled`], which
/// propagates straight through since there is nothing to fall back to once
/// the caller no longer wants the result.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Connection-class failure reaching the proxy (DNS, refused, timeout).
    #[error("llm proxy unreachable at {url}")]
    ProxyUnreachable {
        /// The proxy base URL the client attempted to reach.
        url: String,
        /// Underlying transport error.
        #[source]
        source: anyhow::Error,
    },
    /// Well-formed error response from the proxy or upstream provider
    /// (model unavailable, quota exceeded, invalid request).
    #[error("llm provider error: {0}")]
    ProviderError(String),
    /// The caller abandoned the call (e.g. the task was cancelled).
    #[error("llm call cancelled")]
    Cancelled,
}

/// Convenience alias for results at the `LmClient` boundary.
pub type LlmResult<T> = Result<T, LlmError>;
