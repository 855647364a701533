//! Route handlers (§10.1).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseAxumEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use taskgate_sse::SseItem;
use taskgate_types::{EventId, NormalizedMessage, TaskId, TaskStatus};
use taskgate_worker::health::ReadinessProfile;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the full router, including the trace layer every request passes
/// through first.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/message", post(submit_message))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:task_id", get(get_task))
        .route("/api/tasks/:task_id/cancel", post(cancel_task))
        .route("/api/stream/task/:task_id", get(stream_task))
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
        .with_state(state)
}

//─────────────────────────────
//  POST /api/message
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitMessageRequest {
    #[serde(flatten)]
    message: NormalizedMessage,
    #[serde(default)]
    model_alias: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitMessageResponse {
    task_id: TaskId,
    status: TaskStatus,
    created: bool,
}

async fn submit_message(
    State(state): State<AppState>,
    Json(request): Json<SubmitMessageRequest>,
) -> Result<Response, ApiError> {
    let outcome = state
        .service
        .submit_message(request.message, request.model_alias)
        .await?;
    // A freshly created task is always `CREATED` at this point; re-reading
    // would race the driver, which is spawned before this handler returns.
    // A duplicate submission reports whatever status the existing task has
    // already reached.
    let status = if outcome.created {
        TaskStatus::Created
    } else {
        state.service.get_task_detail(outcome.task_id).await?.task.status
    };
    let body = SubmitMessageResponse {
        task_id: outcome.task_id,
        status,
        created: outcome.created,
    };
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(body)).into_response())
}

//─────────────────────────────
//  GET /api/tasks
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    status: Option<String>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Response, ApiError> {
    let status = match query.status {
        Some(raw) => match parse_status(&raw) {
            Some(status) => Some(status),
            None => {
                return Ok((
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({
                        "error": { "code": "VALIDATION_ERROR", "message": format!("unknown status filter: {raw}") }
                    })),
                )
                    .into_response())
            }
        },
        None => None,
    };
    let tasks = state.service.list_tasks(status).await?;
    Ok(Json(tasks).into_response())
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_uppercase())).ok()
}

//─────────────────────────────
//  GET /api/tasks/{task_id}
//─────────────────────────────

async fn get_task(State(state): State<AppState>, Path(task_id): Path<TaskId>) -> Result<Response, ApiError> {
    let detail = state.service.get_task_detail(task_id).await?;
    Ok(Json(detail).into_response())
}

//─────────────────────────────
//  POST /api/tasks/{task_id}/cancel
//─────────────────────────────

#[derive(Debug, Serialize)]
struct CancelResponse {
    task_id: TaskId,
    status: TaskStatus,
}

async fn cancel_task(State(state): State<AppState>, Path(task_id): Path<TaskId>) -> Result<Response, ApiError> {
    state.service.cancel(task_id).await?;
    let task = state.service.get_task_detail(task_id).await?.task;
    Ok(Json(CancelResponse {
        task_id,
        status: task.status,
    })
    .into_response())
}

//─────────────────────────────
//  GET /api/stream/task/{task_id}
//─────────────────────────────

async fn stream_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Confirm the task exists before opening the stream, per §6.
    state.service.get_task_detail(task_id).await?;

    let last_event_id = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<EventId>().ok());

    let stream = state.service.subscribe(task_id, last_event_id);
    let sse_stream = stream.map(|item| {
        let event = match item {
            SseItem::Event(frame) => SseAxumEvent::default()
                .id(frame.id.clone())
                .event(frame.event.clone())
                .json_data(&frame.data)
                .unwrap_or_else(|_| SseAxumEvent::default().data("serialization_error")),
            SseItem::Heartbeat => SseAxumEvent::default().comment("heartbeat"),
        };
        Ok::<_, std::convert::Infallible>(event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response())
}

//─────────────────────────────
//  GET /health
//─────────────────────────────

async fn liveness() -> Response {
    Json(serde_json::json!({ "status": "up" })).into_response()
}

//─────────────────────────────
//  GET /ready
//─────────────────────────────

#[derive(Debug, Deserialize)]
struct ReadyQuery {
    profile: Option<String>,
}

async fn readiness(State(state): State<AppState>, Query(query): Query<ReadyQuery>) -> Response {
    let profile = ReadinessProfile::parse(query.profile.as_deref());
    let report = taskgate_worker::health::run_readiness(
        state.service.store(),
        &state.artifacts_dir,
        state.llm_proxy.as_ref(),
        profile,
    )
    .await;
    let status = if report.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report)).into_response()
}
