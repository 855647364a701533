//! Wire-agnostic request/response shapes shared by every [`crate::LmClient`].

use serde::{Deserialize, Serialize};
use taskgate_types::TokenUsage;

/// One turn of a chat-style prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"` or `"assistant"`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Construct a `user`-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Result of one model call, uniform across the primary client and the echo
/// fallback so callers never need to branch on which one answered.
#[derive(Debug, Clone)]
pub struct CallResult {
    /// Response text.
    pub content: String,
    /// Semantic alias or runtime group the call was made with.
    pub model_alias: String,
    /// Concrete model name the provider reports, empty if unknown.
    pub model_name: String,
    /// Concrete provider name (e.g. `openai`, `anthropic`, `echo`).
    pub provider: String,
    /// End-to-end call duration.
    pub duration_ms: u64,
    /// Token accounting for the call.
    pub token_usage: TokenUsage,
    /// Derived cost in USD, `0.0` when unavailable.
    pub cost_usd: f64,
    /// Set when neither cost channel could derive a figure.
    pub cost_unavailable: bool,
    /// Set when the echo adapter served this call instead of the primary.
    pub is_fallback: bool,
    /// Human-readable reason the primary was bypassed, empty otherwise.
    pub fallback_reason: String,
}

/// Extract the content of the last `user`-role message, or `"(empty)"` if
/// none is present.
pub fn last_user_content(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .or_else(|| messages.last().map(|m| m.content.clone()))
        .unwrap_or_else(|| "(empty)".to_string())
}
