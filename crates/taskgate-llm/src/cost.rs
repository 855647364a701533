//! Cost and usage extraction from a raw proxy response.
//!
//! None of these functions ever raise: a field that is missing or
//! unparseable simply degrades to the safe default, and a cost that cannot
//! be derived reports `cost_unavailable` rather than propagating an error.

use serde::Deserialize;
use taskgate_types::TokenUsage;
use tracing::debug;

/// OpenAI-compatible chat completion response shape, with the LiteLLM-proxy
/// extension (`_hidden_params`) read opportunistically.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<UsageField>,
    #[serde(default, rename = "_hidden_params")]
    pub hidden_params: Option<HiddenParams>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UsageField {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct HiddenParams {
    #[serde(default)]
    pub response_cost: Option<f64>,
    #[serde(default)]
    pub custom_llm_provider: String,
}

/// Derive `(cost_usd, cost_unavailable)` from a response.
///
/// The only channel available on this side of the proxy is the per-call
/// figure LiteLLM nests under `_hidden_params.response_cost`; there is no
/// local pricing-table lookup here (see `DESIGN.md` for why). If that field
/// is absent, cost is unavailable.
pub fn calculate_cost(response: &ChatCompletionResponse) -> (f64, bool) {
    if let Some(hidden) = &response.hidden_params {
        if let Some(cost) = hidden.response_cost {
            if cost >= 0.0 {
                return (cost, false);
            }
        }
    }
    debug!("cost_unavailable");
    (0.0, true)
}

/// Parse token usage, defaulting to all-zero when absent.
pub fn parse_usage(response: &ChatCompletionResponse) -> TokenUsage {
    response
        .usage
        .as_ref()
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default()
}

/// Pull `(model_name, provider)` out of the response, both empty if absent.
pub fn extract_model_info(response: &ChatCompletionResponse) -> (String, String) {
    let model_name = response.model.clone();
    let provider = response
        .hidden_params
        .as_ref()
        .map(|h| h.custom_llm_provider.clone())
        .unwrap_or_default();
    (model_name, provider)
}
