//! Deterministic local adapter used both as the `echo`-mode primary and as
//! the fallback every [`crate::fallback::FallbackManager`] lands on.

use async_trait::async_trait;
use taskgate_types::TokenUsage;

use crate::error::LlmResult;
use crate::models::{last_user_content, CallResult, ChatMessage};
use crate::LmClient;

/// Echoes the last `user`-role message back as `"Echo: {content}"`, with
/// token counts synthesized by word count and zero cost.
#[derive(Debug, Default)]
pub struct EchoAdapter;

impl EchoAdapter {
    /// Construct a new adapter. Stateless; cheap to build per call if ever
    /// convenient.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LmClient for EchoAdapter {
    async fn complete(&self, messages: &[ChatMessage], model_alias: &str) -> LlmResult<CallResult> {
        let start = std::time::Instant::now();
        let user_content = last_user_content(messages);

        // Mirrors the tiny artificial latency the original echo adapter
        // introduces so callers never observe a suspiciously instant result.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let response_text = format!("Echo: {user_content}");
        let prompt_tokens = word_count(&user_content);
        let completion_tokens = word_count(&response_text);

        Ok(CallResult {
            content: response_text,
            model_alias: model_alias.to_string(),
            model_name: "echo".to_string(),
            provider: "echo".to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
            cost_usd: 0.0,
            cost_unavailable: false,
            is_fallback: false,
            fallback_reason: String::new(),
        })
    }
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let adapter = EchoAdapter::new();
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: "be helpful".to_string(),
            },
            ChatMessage::user("Hello there"),
        ];
        let result = adapter.complete(&messages, "main").await.unwrap();
        assert_eq!(result.content, "Echo: Hello there");
        assert_eq!(result.provider, "echo");
        assert!(!result.is_fallback);
        assert_eq!(result.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn falls_back_to_last_message_without_user_role() {
        let adapter = EchoAdapter::new();
        let messages = vec![ChatMessage {
            role: "assistant".to_string(),
            content: "prior reply".to_string(),
        }];
        let result = adapter.complete(&messages, "main").await.unwrap();
        assert_eq!(result.content, "Echo: prior reply");
    }

    #[tokio::test]
    async fn empty_messages_yield_placeholder() {
        let adapter = EchoAdapter::new();
        let result = adapter.complete(&[], "main").await.unwrap();
        assert_eq!(result.content, "Echo: (empty)");
    }
}
