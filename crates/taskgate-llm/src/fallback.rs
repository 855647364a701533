//! Lazy-probe fallback: try the primary on every call, land on the echo
//! adapter on any failure, without remembering that the primary was once
//! unhealthy.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{LlmError, LlmResult};
use crate::models::{CallResult, ChatMessage};
use crate::LmClient;

/// Wraps an optional primary client and a fallback client (ordinarily an
/// [`crate::echo::EchoAdapter`]).
///
/// No health state is cached between calls: a primary that failed a moment
/// ago is tried again, plainly, on the next call. When no primary is
/// configured (echo-only mode) every call goes straight to the fallback
/// without being tagged as a degraded call, since there was never a primary
/// to fail.
pub struct FallbackManager {
    primary: Option<Arc<dyn LmClient>>,
    fallback: Arc<dyn LmClient>,
}

impl FallbackManager {
    /// Construct a manager that always tries `primary` first, falling back
    /// to `fallback` on any error.
    pub fn new(primary: Arc<dyn LmClient>, fallback: Arc<dyn LmClient>) -> Self {
        Self {
            primary: Some(primary),
            fallback,
        }
    }

    /// Construct a manager with no primary configured; every call is
    /// served by `fallback` directly.
    pub fn echo_only(fallback: Arc<dyn LmClient>) -> Self {
        Self {
            primary: None,
            fallback,
        }
    }

    /// Make a call, falling back transparently on any primary failure.
    ///
    /// Returns an error only when both the primary (if configured) and the
    /// fallback fail, or when `messages` themselves can't be interpreted
    /// (never the case for the echo adapter).
    pub async fn call(&self, messages: &[ChatMessage], model_alias: &str) -> LlmResult<CallResult> {
        let Some(primary) = &self.primary else {
            return self.fallback.complete(messages, model_alias).await;
        };

        match primary.complete(messages, model_alias).await {
            Ok(result) => Ok(result),
            Err(primary_error) => {
                warn!(model_alias, error = %primary_error, "primary_failed_attempting_fallback");
                match self.fallback.complete(messages, model_alias).await {
                    Ok(mut result) => {
                        result.is_fallback = true;
                        result.fallback_reason = primary_error.to_string();
                        info!(model_alias, reason = %primary_error, "fallback_activated");
                        Ok(result)
                    }
                    Err(fallback_error) => {
                        tracing::error!(
                            model_alias,
                            primary_error = %primary_error,
                            fallback_error = %fallback_error,
                            "both_primary_and_fallback_failed"
                        );
                        Err(LlmError::ProviderError(format!(
                            "primary and fallback both failed: primary={primary_error}; fallback={fallback_error}"
                        )))
                    }
                }
            }
        }
    }
}
