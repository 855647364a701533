//! Environment-driven configuration for the model call stack.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use secrecy::Secret;
use tracing::{debug, warn};

use crate::echo::EchoAdapter;
use crate::fallback::FallbackManager;
use crate::providers::PrimaryClient;

/// `TASKGATE_LLM_MODE` selects whether a primary client is wired in at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    /// Call the configured primary, falling back to echo on failure.
    Primary,
    /// Serve every call from the echo adapter; no primary is configured.
    Echo,
}

/// Configuration loaded from `TASKGATE_LLM_*` environment variables.
pub struct LlmConfig {
    /// Whether a primary client should be constructed at all.
    pub mode: LlmMode,
    /// Base URL of the primary LM proxy.
    pub proxy_base_url: String,
    /// Proxy access key (the proxy's own key, not an upstream provider key).
    pub proxy_api_key: Secret<String>,
    /// Per-call timeout against the primary.
    pub timeout: Duration,
}

impl LlmConfig {
    /// Load configuration from the environment, defaulting to echo-only
    /// mode when `TASKGATE_LLM_MODE` is unset.
    pub fn from_env() -> Self {
        let mode = match env::var("TASKGATE_LLM_MODE").ok().as_deref() {
            Some("primary") => LlmMode::Primary,
            Some("echo") | None => LlmMode::Echo,
            Some(other) => {
                warn!(value = other, "unknown_llm_mode_falling_back_to_echo");
                LlmMode::Echo
            }
        };

        let proxy_base_url = env::var("TASKGATE_LLM_PROXY_URL")
            .unwrap_or_else(|_| "http://localhost:4000".to_string());

        let proxy_api_key = Secret::new(env::var("TASKGATE_LLM_PROXY_KEY").unwrap_or_default());

        let timeout_secs: u64 = env::var("TASKGATE_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        debug!(?mode, proxy_base_url, timeout_secs, "llm_config_loaded");

        Self {
            mode,
            proxy_base_url,
            proxy_api_key,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Build the [`FallbackManager`] this configuration describes.
    pub fn build_fallback_manager(&self) -> FallbackManager {
        let fallback = Arc::new(EchoAdapter::new());
        match self.mode {
            LlmMode::Echo => FallbackManager::echo_only(fallback),
            LlmMode::Primary => {
                let primary = Arc::new(PrimaryClient::new(
                    self.proxy_base_url.clone(),
                    self.proxy_api_key.clone(),
                    self.timeout,
                ));
                FallbackManager::new(primary, fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_echo_mode_when_unset() {
        env::remove_var("TASKGATE_LLM_MODE");
        let config = LlmConfig::from_env();
        assert_eq!(config.mode, LlmMode::Echo);
    }
}
