//! Primary model client: an HTTP call to a LiteLLM-proxy-compatible chat
//! completions endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::cost::{calculate_cost, extract_model_info, parse_usage, ChatCompletionResponse};
use crate::error::{LlmError, LlmResult};
use crate::models::{CallResult, ChatMessage};
use crate::LmClient;

/// Hardcoded timeout for [`PrimaryClient::health_check`]; readiness probes
/// must answer quickly regardless of the configured call timeout.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

/// Client for a LiteLLM-proxy-style `/chat/completions` endpoint.
///
/// The key configured here is the proxy's own access key, never a raw LM
/// provider API key: those live only inside the proxy's environment.
pub struct PrimaryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
    timeout: Duration,
}

impl PrimaryClient {
    /// Construct a client for `base_url`, trimming any trailing slash.
    pub fn new(base_url: impl Into<String>, api_key: Secret<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    /// Probe the proxy's liveliness endpoint. Never raises: any failure
    /// (timeout, connection refused, non-200) is reported as `false`.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health/liveliness", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                debug!(url, error = %err, "health_check_failed");
                false
            }
        }
    }
}

fn is_connection_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[async_trait]
impl LmClient for PrimaryClient {
    async fn complete(&self, messages: &[ChatMessage], model_alias: &str) -> LlmResult<CallResult> {
        let start = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: model_alias,
            messages,
            temperature: 0.7,
        };

        debug!(model_alias, message_count = messages.len(), "llm_call_start");

        let key = self.api_key.expose_secret();
        let bearer = if key.is_empty() { "no-key" } else { key.as_str() };

        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                error!(model_alias, error = %err, "llm_call_transport_failed");
                if is_connection_error(&err) {
                    LlmError::ProxyUnreachable {
                        url: self.base_url.clone(),
                        source: err.into(),
                    }
                } else {
                    LlmError::ProviderError(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            error!(model_alias, %status, "llm_call_rejected");
            return Err(LlmError::ProviderError(format!(
                "proxy responded {status}: {body_text}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| LlmError::ProviderError(format!("malformed proxy response: {err}")))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        let (cost_usd, cost_unavailable) = calculate_cost(&parsed);
        let token_usage = parse_usage(&parsed);
        let (model_name, provider) = extract_model_info(&parsed);
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            model_alias,
            model_name, provider, duration_ms, cost_usd, "llm_call_completed"
        );

        Ok(CallResult {
            content,
            model_alias: model_alias.to_string(),
            model_name,
            provider,
            duration_ms,
            token_usage,
            cost_usd,
            cost_unavailable,
            is_fallback: false,
            fallback_reason: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(base_url: impl Into<String>) -> PrimaryClient {
        PrimaryClient::new(base_url, Secret::new("test-key".to_string()), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn complete_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{ "message": { "content": "hello there" } }],
                "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 },
                "_hidden_params": { "custom_llm_provider": "openai", "response_cost": 0.001 },
            })))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let messages = vec![ChatMessage::user("hi")];
        let result = client.complete(&messages, "default").await.unwrap();

        assert_eq!(result.content, "hello there");
        assert_eq!(result.model_name, "gpt-4o-mini");
        assert_eq!(result.provider, "openai");
        assert_eq!(result.model_alias, "default");
        assert_eq!(result.token_usage.total_tokens, 5);
        assert_eq!(result.cost_usd, 0.001);
        assert!(!result.cost_unavailable);
        assert!(!result.is_fallback);
    }

    #[tokio::test]
    async fn complete_maps_non_success_status_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let err = client.complete(&[ChatMessage::user("hi")], "default").await.unwrap_err();

        match err {
            LlmError::ProviderError(message) => {
                assert!(message.contains("429"));
                assert!(message.contains("rate limited"));
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn complete_maps_malformed_body_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let err = client.complete(&[ChatMessage::user("hi")], "default").await.unwrap_err();

        assert!(matches!(err, LlmError::ProviderError(_)));
    }

    #[tokio::test]
    async fn complete_classifies_unreachable_proxy_as_connection_error() {
        // Bind then drop a listener to obtain a port nothing is serving.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(format!("http://{addr}"));
        let err = client.complete(&[ChatMessage::user("hi")], "default").await.unwrap_err();

        match err {
            LlmError::ProxyUnreachable { url, .. } => assert!(url.contains(&addr.to_string())),
            other => panic!("expected ProxyUnreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_check_true_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health/liveliness"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(server.uri());
        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn health_check_false_on_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health/liveliness"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(server.uri());
        assert!(!client.health_check().await);
    }

    #[tokio::test]
    async fn health_check_false_when_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(format!("http://{addr}"));
        assert!(!client.health_check().await);
    }
}
