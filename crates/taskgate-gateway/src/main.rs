#![forbid(unsafe_code)]

//! **taskgate-gateway** – HTTP entry point for the task conversation
//! gateway.
//!
//! Constructs the SQLite-backed store, the SSE hub and the fallback LM
//! client stack, wires them into a [`taskgate_worker::TaskService`], mounts
//! the HTTP routes in [`routes`] and serves the result until it receives
//! `SIGINT`/`SIGTERM`.
//!
//! ```bash
//! # Start the gateway with the primary LM provider configured
//! TASKGATE_LLM_MODE=primary TASKGATE_LLM_PROXY_URL=http://localhost:4000 taskgate-gateway
//! ```

mod config;
mod error;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;

use taskgate_llm::{LlmConfig, LlmMode, PrimaryClient};
use taskgate_sse::SseHub;
use taskgate_store_sqlite::SqliteBackend;
use taskgate_worker::service::ServiceConfig;
use taskgate_worker::TaskService;

use crate::config::GatewayConfig;
use crate::state::AppState;

/// Minimal CLI surface; every other setting comes from the environment
/// (§10.4), matching the teacher's env-first configuration style.
#[derive(Parser)]
#[command(name = "taskgate-gateway")]
#[command(about = "Event-sourced task conversation gateway")]
#[command(version)]
struct Cli {
    /// Override `TASKGATE_HTTP_PORT` for this run.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = GatewayConfig::from_env();
    if let Some(port) = cli.port {
        config.http_port = port;
    }

    config::init_logging(config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "starting_taskgate_gateway");

    tokio::fs::create_dir_all(&config.artifacts_dir)
        .await
        .with_context(|| format!("failed to create artifacts dir {}", config.artifacts_dir.display()))?;

    let store = Arc::new(
        SqliteBackend::open(&config.db_path, config.artifacts_dir.clone())
            .await
            .with_context(|| format!("failed to open sqlite store at {}", config.db_path.display()))?
            .with_inline_threshold(config.artifact_inline_threshold as u64),
    );

    let hub = Arc::new(SseHub::default());

    let llm_config = LlmConfig::from_env();
    let primary_client = match llm_config.mode {
        LlmMode::Primary => Some(Arc::new(PrimaryClient::new(
            llm_config.proxy_base_url.clone(),
            llm_config.proxy_api_key.clone(),
            llm_config.timeout,
        ))),
        LlmMode::Echo => None,
    };
    let llm = Arc::new(llm_config.build_fallback_manager());
    let aliases = Arc::new(taskgate_llm::AliasRegistry::new());

    let service_config = ServiceConfig {
        response_summary_max_bytes: config.event_payload_max_bytes,
        sse_heartbeat_interval: config.sse_heartbeat_interval,
    };
    let service = Arc::new(TaskService::new(store, hub, llm, aliases, service_config));

    let state = AppState::new(service, config.artifacts_dir.clone(), primary_client);
    let app = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("failed to bind to port {}", config.http_port))?;

    info!(port = config.http_port, "listening");

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                tracing::error!(error = %err, "http_server_error");
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown_signal_received");
        }
    }

    info!("taskgate_gateway_stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
