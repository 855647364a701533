//! Environment-driven process configuration (§10.4).
//!
//! Every numeric value falls back to its default on a missing or
//! unparsable environment variable rather than failing startup; only the
//! LM call stack's own configuration (`taskgate_llm::LlmConfig`) is loaded
//! separately, since it owns its own env var names.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

const DEFAULT_DB_PATH: &str = "data/sqlite/taskgate.db";
const DEFAULT_ARTIFACTS_DIR: &str = "data/artifacts";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_SSE_HEARTBEAT_SECS: u64 = 15;

/// Top-level process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// SQLite database file path.
    pub db_path: PathBuf,
    /// Artifact spill root directory.
    pub artifacts_dir: PathBuf,
    /// `MODEL_CALL_COMPLETED.response_summary` truncation boundary, in
    /// bytes.
    pub event_payload_max_bytes: usize,
    /// Inline-vs-spill byte threshold for artifact content.
    pub artifact_inline_threshold: usize,
    /// SSE heartbeat period.
    pub sse_heartbeat_interval: Duration,
    /// `dev` or `json`.
    pub log_format: LogFormat,
    /// HTTP bind port.
    pub http_port: u16,
}

/// Human-readable vs machine-readable log rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `tracing_subscriber::fmt::layer()`, for local development.
    Dev,
    /// `tracing_subscriber::fmt::layer().json()`, for production log
    /// aggregation.
    Json,
}

fn env_usize(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = raw, "invalid_env_value_using_default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = raw, "invalid_env_value_using_default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = raw, "invalid_env_value_using_default");
            default
        }),
        Err(_) => default,
    }
}

impl GatewayConfig {
    /// Load configuration from the environment, substituting defaults for
    /// any value that is absent or fails to parse.
    pub fn from_env() -> Self {
        let db_path = env::var("TASKGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        let artifacts_dir = env::var("TASKGATE_ARTIFACTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTIFACTS_DIR));

        let event_payload_max_bytes = env_usize(
            "TASKGATE_EVENT_PAYLOAD_MAX_BYTES",
            taskgate_types::DEFAULT_EVENT_PAYLOAD_MAX_BYTES,
        );
        let artifact_inline_threshold = env_usize(
            "TASKGATE_ARTIFACT_INLINE_THRESHOLD",
            taskgate_types::DEFAULT_ARTIFACT_INLINE_THRESHOLD,
        );
        let sse_heartbeat_interval =
            Duration::from_secs(env_u64("TASKGATE_SSE_HEARTBEAT_INTERVAL_SECS", DEFAULT_SSE_HEARTBEAT_SECS));

        let log_format = match env::var("TASKGATE_LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            Some("dev") | None => LogFormat::Dev,
            Some(other) => {
                warn!(value = other, "unknown_log_format_falling_back_to_dev");
                LogFormat::Dev
            }
        };

        let http_port = env_u16("TASKGATE_HTTP_PORT", DEFAULT_HTTP_PORT);

        Self {
            db_path,
            artifacts_dir,
            event_payload_max_bytes,
            artifact_inline_threshold,
            sse_heartbeat_interval,
            log_format,
            http_port,
        }
    }
}

/// Install the global `tracing` subscriber per `config.log_format` and
/// `TASKGATE_LOG_LEVEL`/`RUST_LOG`.
pub fn init_logging(log_format: LogFormat) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = env::var("RUST_LOG")
        .or_else(|_| env::var("TASKGATE_LOG_LEVEL"))
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        LogFormat::Dev => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_absent() {
        env::remove_var("TASKGATE_HTTP_PORT");
        assert_eq!(env_u16("TASKGATE_HTTP_PORT", DEFAULT_HTTP_PORT), DEFAULT_HTTP_PORT);
    }

    #[test]
    fn invalid_numeric_value_falls_back_to_default() {
        env::set_var("TASKGATE_HTTP_PORT_TEST", "not-a-number");
        assert_eq!(env_u16("TASKGATE_HTTP_PORT_TEST", DEFAULT_HTTP_PORT), DEFAULT_HTTP_PORT);
        env::remove_var("TASKGATE_HTTP_PORT_TEST");
    }
}
