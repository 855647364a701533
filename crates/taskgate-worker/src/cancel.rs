//! Cancellation surface (§4.8): moves a task to `CANCELLED` from whatever
//! status it is currently in, or reports why it couldn't.
//!
//! Cancellation never blocks on the driver: it takes the per-task
//! serializer lock only for the instant it needs to allocate a sequence
//! number and append its own event, the same as every other writer in this
//! crate, so a task mid-LM-call is cancelled immediately rather than
//! waiting for that call to return.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use taskgate_store_core::{Backend, StoreError};
use taskgate_store_sqlite::{TaskSerializer, MAX_SEQ_RETRIES};
use taskgate_sse::SseHub;
use taskgate_types::{ActorType, Event, EventId, EventPayload, StateTransitionPayload, TaskId, TaskStatus};
use tracing::warn;

/// Errors returned by [`cancel`].
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    /// No task exists with the given id.
    #[error("task not found")]
    NotFound,
    /// The task has already reached a terminal status and cannot be
    /// cancelled.
    #[error("task already terminal ({status})")]
    AlreadyTerminal {
        /// The terminal status the task was already in.
        status: TaskStatus,
    },
    /// Underlying store error unrelated to the cancellation semantics
    /// above.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Cancel `task_id`. Re-reads the task's current status on every retry, so
/// a task that transitions out from under a concurrent writer (e.g. the
/// driver landing `SUCCEEDED` a moment before cancel runs) is reported as
/// [`CancelError::AlreadyTerminal`] rather than silently corrupting the
/// log with an illegal transition.
pub async fn cancel(
    store: &Arc<dyn Backend>,
    serializer: &Arc<TaskSerializer>,
    hub: &Arc<SseHub>,
    task_id: TaskId,
) -> Result<(), CancelError> {
    for attempt in 0..=MAX_SEQ_RETRIES {
        let task = store.get_task(task_id).await?.ok_or(CancelError::NotFound)?;

        if task.status.is_terminal() {
            return Err(CancelError::AlreadyTerminal { status: task.status });
        }
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return Err(CancelError::AlreadyTerminal { status: task.status });
        }

        let event = {
            let lock = serializer.lock_for(task_id);
            let _guard = lock.lock().await;
            let seq = store.next_task_seq(task_id).await?;
            let event = Event {
                event_id: EventId::new(),
                task_id,
                task_seq: seq,
                ts: now_millis(),
                schema_version: 1,
                actor: ActorType::System,
                payload: EventPayload::StateTransition(StateTransitionPayload {
                    from_status: task.status,
                    to_status: TaskStatus::Cancelled,
                    reason: "user cancelled".to_string(),
                }),
                trace_id: Some(format!("trace-{task_id}")),
                span_id: None,
                parent_event_id: None,
                idempotency_key: None,
            };
            let commit = store
                .commit_transition(event.clone(), TaskStatus::Cancelled, Some(task.status))
                .await;
            match commit {
                Ok(()) => Some(event),
                Err(StoreError::SequenceConflict { .. }) if attempt < MAX_SEQ_RETRIES => {
                    warn!(task_id = %task_id, attempt, "sequence_conflict_retrying_cancel");
                    None
                }
                Err(StoreError::StatusConflict { actual, .. }) => {
                    return Err(CancelError::AlreadyTerminal { status: actual });
                }
                Err(other) => return Err(other.into()),
            }
        };

        if let Some(event) = event {
            hub.broadcast(task_id, event);
            serializer.reclaim(task_id);
            return Ok(());
        }
    }

    Err(StoreError::SequenceConflict {
        task_id,
        task_seq: 0,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use taskgate_store_sqlite::SqliteBackend;

    async fn setup() -> (Arc<dyn Backend>, Arc<TaskSerializer>, Arc<SseHub>, TaskId) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Backend> =
            Arc::new(SqliteBackend::in_memory(PathBuf::from(dir.path()).join("artifacts")).await.unwrap());
        let serializer = Arc::new(TaskSerializer::new());
        let hub = Arc::new(SseHub::default());

        let outcome = crate::ingress::submit(
            &store,
            taskgate_types::NormalizedMessage {
                channel: "web".into(),
                thread_id: "t1".into(),
                scope_id: None,
                sender_id: "u1".into(),
                sender_name: "User".into(),
                timestamp: 0,
                text: "hi".into(),
                attachments: vec![],
                idempotency_key: "k1".into(),
            },
        )
        .await
        .unwrap();

        (store, serializer, hub, outcome.task_id)
    }

    #[tokio::test]
    async fn cancel_created_task_succeeds() {
        let (store, serializer, hub, task_id) = setup().await;
        cancel(&store, &serializer, &hub, task_id).await.unwrap();
        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let (store, serializer, hub, _task_id) = setup().await;
        let err = cancel(&store, &serializer, &hub, TaskId::new()).await.unwrap_err();
        assert!(matches!(err, CancelError::NotFound));
    }

    #[tokio::test]
    async fn cancel_already_terminal_task_is_rejected() {
        let (store, serializer, hub, task_id) = setup().await;
        cancel(&store, &serializer, &hub, task_id).await.unwrap();
        let err = cancel(&store, &serializer, &hub, task_id).await.unwrap_err();
        assert!(matches!(
            err,
            CancelError::AlreadyTerminal {
                status: TaskStatus::Cancelled
            }
        ));
    }
}
