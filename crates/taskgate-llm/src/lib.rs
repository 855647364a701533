#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **taskgate-llm** – the model call driver's provider stack.
//!
//! Resolves a semantic model alias to a runtime group, calls the primary
//! LM proxy over HTTP, and falls transparently back to a deterministic echo
//! adapter on any primary failure. Every client in this crate answers
//! through the same [`LmClient`] trait and returns the same [`CallResult`],
//! so the call driver in `taskgate-worker` never has to branch on which one
//! actually produced the text.
//!
//! ```rust,no_run
//! # use taskgate_llm::{LlmConfig, AliasRegistry, ChatMessage};
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = LlmConfig::from_env();
//! let manager = config.build_fallback_manager();
//! let aliases = AliasRegistry::new();
//! let runtime_group = aliases.resolve("planner");
//! let result = manager
//!     .call(&[ChatMessage::user("hello")], &runtime_group)
//!     .await?;
//! println!("{}", result.content);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

pub mod alias;
pub mod config;
pub mod cost;
pub mod echo;
pub mod error;
pub mod fallback;
pub mod models;
pub mod providers;

pub use alias::{AliasConfig, AliasRegistry};
pub use config::{LlmConfig, LlmMode};
pub use echo::EchoAdapter;
pub use error::{LlmError, LlmResult};
pub use fallback::FallbackManager;
pub use models::{last_user_content, CallResult, ChatMessage};
pub use providers::PrimaryClient;

/// Capability boundary implemented by both the primary HTTP client and the
/// echo fallback. `model_alias` is expected to already be a resolved
/// runtime group (`cheap` / `main` / `fallback`), not a semantic alias —
/// callers resolve through [`AliasRegistry`] before calling.
#[async_trait]
pub trait LmClient: Send + Sync {
    /// Complete `messages`, routed by `model_alias`.
    async fn complete(&self, messages: &[ChatMessage], model_alias: &str) -> LlmResult<CallResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn echo_only_manager_resolves_through_alias_registry() {
        let manager = FallbackManager::echo_only(Arc::new(EchoAdapter::new()));
        let registry = AliasRegistry::new();
        let group = registry.resolve("planner");
        let result = manager
            .call(&[ChatMessage::user("ping")], &group)
            .await
            .unwrap();
        assert_eq!(result.content, "Echo: ping");
    }
}
