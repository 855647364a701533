//! The background LM call driver (§4.4): advances a freshly created task
//! through `CREATED -> RUNNING -> SUCCEEDED | FAILED`, driving the
//! [`FallbackManager`] and the artifact store along the way.
//!
//! Spawned once per task by [`crate::service::TaskService::submit_message`]
//! immediately after a successful ingress commit. Never returns an error to
//! its caller: every failure mode either resolves into a `FAILED`
//! transition or, if even that append fails, a direct projection update.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use taskgate_llm::{AliasRegistry, ChatMessage, FallbackManager};
use taskgate_store_core::{Backend, StoreError, StoreResult};
use taskgate_store_sqlite::{TaskSerializer, MAX_SEQ_RETRIES};
use taskgate_sse::SseHub;
use taskgate_types::{
    truncate_utf8_with_marker, ActorType, ArtifactCreatedPayload, Event, EventId, EventPayload,
    ModelCallCompletedPayload, ModelCallFailedPayload, ModelCallStartedPayload, StateTransitionPayload,
    TaskId, TaskStatus,
};

/// First N characters of the user's text carried in `MODEL_CALL_STARTED`'s
/// `request_summary`, mirroring the title/preview truncation style used
/// elsewhere.
const REQUEST_SUMMARY_CHARS: usize = 100;

/// Fixed, sanitized message surfaced on a `MODEL_CALL_FAILED` event. The
/// real error (which may carry connection details or provider text) only
/// ever reaches the logs.
const SANITIZED_ERROR_MESSAGE: &str = "LM call failed; see server logs for details.";

/// Shared collaborators every driver invocation needs. Constructed once by
/// [`crate::service::TaskService`] and cloned (cheaply, behind `Arc`) into
/// each spawned driver task.
pub struct DriverContext {
    /// Event/projection/artifact store.
    pub store: Arc<dyn Backend>,
    /// Per-task write serializer.
    pub serializer: Arc<TaskSerializer>,
    /// SSE fan-out hub.
    pub hub: Arc<SseHub>,
    /// Fallback-wrapped LM client.
    pub llm: Arc<FallbackManager>,
    /// Semantic alias -> runtime group resolver.
    pub aliases: Arc<AliasRegistry>,
    /// Byte boundary `MODEL_CALL_COMPLETED.response_summary` is truncated
    /// to.
    pub response_summary_max_bytes: usize,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Append one event under the per-task lock, retrying on `SequenceConflict`
/// up to [`MAX_SEQ_RETRIES`] times. `commit` performs the actual store call
/// (either `commit_transition` or `commit_progress`) against the freshly
/// allocated `task_seq`; `build` constructs the event to append at that
/// sequence number. The lock is held only for the duration of one
/// allocate-and-commit attempt, never across an entire driver run, so a
/// concurrent cancellation is never blocked behind it.
async fn commit_retrying<F, C, Fut>(
    ctx: &DriverContext,
    task_id: TaskId,
    mut build: F,
    commit: C,
) -> StoreResult<Event>
where
    F: FnMut(i64) -> Event,
    C: Fn(Event) -> Fut,
    Fut: std::future::Future<Output = StoreResult<()>>,
{
    for attempt in 0..=MAX_SEQ_RETRIES {
        let lock = ctx.serializer.lock_for(task_id);
        let _guard = lock.lock().await;
        let seq = ctx.store.next_task_seq(task_id).await?;
        let event = build(seq);
        match commit(event.clone()).await {
            Ok(()) => return Ok(event),
            Err(StoreError::SequenceConflict { .. }) if attempt < MAX_SEQ_RETRIES => {
                warn!(task_id = %task_id, attempt, "sequence_conflict_retrying");
                continue;
            }
            Err(other) => return Err(other),
        }
    }
    unreachable!("loop either returns or exhausts retries and returns via the conflict arm")
}

async fn commit_progress(ctx: &DriverContext, task_id: TaskId, payload: EventPayload) -> StoreResult<Event> {
    let store = ctx.store.clone();
    commit_retrying(
        ctx,
        task_id,
        |seq| new_event(task_id, seq, ActorType::Worker, payload.clone()),
        move |event| {
            let store = store.clone();
            async move { store.commit_progress(event).await }
        },
    )
    .await
}

async fn commit_transition(
    ctx: &DriverContext,
    task_id: TaskId,
    expected: TaskStatus,
    to: TaskStatus,
) -> StoreResult<Event> {
    let store = ctx.store.clone();
    let payload = EventPayload::StateTransition(StateTransitionPayload {
        from_status: expected,
        to_status: to,
        reason: String::new(),
    });
    commit_retrying(
        ctx,
        task_id,
        move |seq| new_event(task_id, seq, ActorType::System, payload.clone()),
        move |event| {
            let store = store.clone();
            async move { store.commit_transition(event, to, Some(expected)).await }
        },
    )
    .await
}

fn new_event(task_id: TaskId, seq: i64, actor: ActorType, payload: EventPayload) -> Event {
    Event {
        event_id: EventId::new(),
        task_id,
        task_seq: seq,
        ts: now_millis(),
        schema_version: 1,
        actor,
        payload,
        trace_id: Some(format!("trace-{task_id}")),
        span_id: None,
        parent_event_id: None,
        idempotency_key: None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Drive `task_id` from `CREATED` through to a terminal status. `model_alias`
/// is the semantic alias the caller requested (defaults to `"main"` if
/// absent); it is resolved to a runtime group only at the point the LM is
/// actually invoked, matching the original request verbatim into
/// `MODEL_CALL_STARTED.model_alias`.
pub async fn run(ctx: Arc<DriverContext>, task_id: TaskId, user_text: String, model_alias: Option<String>) {
    let semantic_alias = model_alias.unwrap_or_else(|| "main".to_string());

    let started = commit_transition(&ctx, task_id, TaskStatus::Created, TaskStatus::Running).await;
    let started_event = match started {
        Ok(event) => event,
        Err(StoreError::StatusConflict { .. }) => {
            info!(task_id = %task_id, "driver_exiting_status_conflict_on_start");
            return;
        }
        Err(err) => {
            error!(task_id = %task_id, error = %err, "driver_failed_to_start_running_transition");
            return;
        }
    };
    ctx.hub.broadcast(task_id, started_event);

    let request_summary = format!("User asks: {}", truncate_chars(&user_text, REQUEST_SUMMARY_CHARS));
    match commit_progress(
        &ctx,
        task_id,
        EventPayload::ModelCallStarted(ModelCallStartedPayload {
            model_alias: semantic_alias.clone(),
            request_summary,
        }),
    )
    .await
    {
        Ok(event) => ctx.hub.broadcast(task_id, event),
        Err(err) => {
            fail_task(&ctx, task_id, &semantic_alias, "system", &err.to_string(), 0, false).await;
            return;
        }
    }

    let start = Instant::now();
    let runtime_group = ctx.aliases.resolve(&semantic_alias);
    let call_result = ctx.llm.call(&[ChatMessage::user(user_text)], &runtime_group).await;

    let result = match call_result {
        Ok(result) => result,
        Err(err) => {
            fail_task(
                &ctx,
                task_id,
                &semantic_alias,
                "llm",
                &err.to_string(),
                start.elapsed().as_millis() as u64,
                false,
            )
            .await;
            return;
        }
    };

    let artifact = match ctx
        .store
        .put(
            task_id,
            "llm-response",
            Some("LM response content"),
            "text/plain; charset=utf-8",
            result.content.as_bytes(),
        )
        .await
    {
        Ok(artifact) => artifact,
        Err(err) => {
            fail_task(
                &ctx,
                task_id,
                &semantic_alias,
                "system",
                &err.to_string(),
                result.duration_ms,
                result.is_fallback,
            )
            .await;
            return;
        }
    };

    let response_summary = truncate_utf8_with_marker(&result.content, ctx.response_summary_max_bytes);
    let completed = commit_progress(
        &ctx,
        task_id,
        EventPayload::ModelCallCompleted(ModelCallCompletedPayload {
            model_alias: semantic_alias.clone(),
            model_name: result.model_name.clone(),
            provider: result.provider.clone(),
            response_summary,
            duration_ms: result.duration_ms,
            token_usage: result.token_usage,
            cost_usd: result.cost_usd,
            cost_unavailable: result.cost_unavailable,
            is_fallback: result.is_fallback,
            artifact_ref: artifact.artifact_id,
        }),
    )
    .await;
    match completed {
        Ok(event) => ctx.hub.broadcast(task_id, event),
        Err(err) => {
            fail_task(
                &ctx,
                task_id,
                &semantic_alias,
                "system",
                &err.to_string(),
                result.duration_ms,
                result.is_fallback,
            )
            .await;
            return;
        }
    }

    let artifact_created = commit_progress(
        &ctx,
        task_id,
        EventPayload::ArtifactCreated(ArtifactCreatedPayload {
            artifact_id: artifact.artifact_id,
            name: artifact.name.clone(),
            size: artifact.size,
            part_count: artifact.parts.len(),
        }),
    )
    .await;
    match artifact_created {
        Ok(event) => ctx.hub.broadcast(task_id, event),
        Err(err) => {
            fail_task(
                &ctx,
                task_id,
                &semantic_alias,
                "system",
                &err.to_string(),
                result.duration_ms,
                result.is_fallback,
            )
            .await;
            return;
        }
    }

    match commit_transition(&ctx, task_id, TaskStatus::Running, TaskStatus::Succeeded).await {
        Ok(event) => {
            ctx.hub.broadcast(task_id, event);
            ctx.serializer.reclaim(task_id);
        }
        Err(StoreError::StatusConflict { .. }) => {
            info!(task_id = %task_id, "driver_exiting_status_conflict_on_success");
            ctx.serializer.reclaim(task_id);
        }
        Err(err) => {
            error!(task_id = %task_id, error = %err, "driver_failed_to_commit_success_transition");
        }
    }
}

/// Record a failure and force the task to `FAILED`. Never panics: if the
/// failure event itself cannot be appended, the projection is force-set to
/// `FAILED` directly so the task never gets stuck in `RUNNING`.
async fn fail_task(
    ctx: &DriverContext,
    task_id: TaskId,
    model_alias: &str,
    error_type: &str,
    raw_error: &str,
    duration_ms: u64,
    is_fallback: bool,
) {
    error!(task_id = %task_id, error_type, error = raw_error, "llm_processing_failed");

    let appended = commit_progress(
        ctx,
        task_id,
        EventPayload::ModelCallFailed(ModelCallFailedPayload {
            model_alias: model_alias.to_string(),
            model_name: String::new(),
            provider: String::new(),
            error_type: error_type.to_string(),
            error_message: SANITIZED_ERROR_MESSAGE.to_string(),
            duration_ms,
            is_fallback,
        }),
    )
    .await;

    match appended {
        Ok(event) => {
            ctx.hub.broadcast(task_id, event);
            match commit_transition(ctx, task_id, TaskStatus::Running, TaskStatus::Failed).await
            {
                Ok(event) => {
                    ctx.hub.broadcast(task_id, event);
                    ctx.serializer.reclaim(task_id);
                }
                Err(StoreError::StatusConflict { .. }) => {
                    warn!(task_id = %task_id, "skip_failure_transition_due_to_status_conflict");
                    ctx.serializer.reclaim(task_id);
                }
                Err(err) => {
                    error!(task_id = %task_id, error = %err, "failed_to_commit_failed_transition");
                }
            }
        }
        Err(err) => {
            error!(task_id = %task_id, error = %err, "failed_to_record_failure_event");
            if let Err(force_err) = ctx.store.force_failed_without_event(task_id).await {
                error!(task_id = %task_id, error = %force_err, "task_force_failed_without_event_also_failed");
            } else {
                warn!(task_id = %task_id, "task_force_failed_without_event");
            }
            ctx.serializer.reclaim(task_id);
        }
    }
}
