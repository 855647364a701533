//! [`TaskService`]: the single facade the gateway binary talks to.
//!
//! Bundles the storage backend, the per-task write serializer, the SSE hub
//! and the fallback-wrapped LM client into one `Arc`-cloneable handle, and
//! exposes the handful of operations the HTTP routes need: submit a
//! message, list/fetch tasks, cancel one, and subscribe to its event
//! stream. Every call that mutates state either commits synchronously
//! (ingress, cancel) or spawns the driver in the background and returns
//! immediately (submit), matching the ingress contract in §4.3/§4.4.

use std::sync::Arc;
use std::time::Duration;

use taskgate_llm::{AliasRegistry, FallbackManager};
use taskgate_sse::{SseHub, SseItem};
use taskgate_store_core::{Backend, IngressOutcome, StoreError};
use taskgate_store_sqlite::TaskSerializer;
use taskgate_types::{Artifact, Event, EventId, NormalizedMessage, Task, TaskId, TaskStatus, ValidationError};
use tokio_stream::Stream;
use tracing::info;

use crate::driver::{self, DriverContext};
use crate::{CancelError, IngressError};

/// Errors surfaced by [`TaskService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The inbound message failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Cancellation could not proceed (not found / already terminal).
    #[error("cancel error: {0}")]
    Cancel(#[from] CancelError),
    /// Underlying store error not covered by a more specific variant.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// No task exists with the requested id.
    #[error("task not found")]
    NotFound,
}

impl From<IngressError> for ServiceError {
    fn from(err: IngressError) -> Self {
        match err {
            IngressError::Validation(e) => ServiceError::Validation(e),
            IngressError::Store(e) => ServiceError::Store(e),
        }
    }
}

/// A task's projection row together with its full event log and any
/// artifacts it has produced, the shape `GET /api/tasks/{task_id}` returns.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskDetail {
    /// The current projection row.
    pub task: Task,
    /// Every event committed for this task, ordered by `task_seq`.
    pub events: Vec<Event>,
    /// Every artifact produced for this task, ordered by creation time.
    pub artifacts: Vec<Artifact>,
}

/// Configuration `TaskService` needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Byte boundary a `MODEL_CALL_COMPLETED.response_summary` is
    /// truncated to.
    pub response_summary_max_bytes: usize,
    /// Heartbeat interval for `GET /api/stream/task/{task_id}`.
    pub sse_heartbeat_interval: Duration,
}

/// The gateway's single point of contact with the task engine.
pub struct TaskService {
    store: Arc<dyn Backend>,
    serializer: Arc<TaskSerializer>,
    hub: Arc<SseHub>,
    llm: Arc<FallbackManager>,
    aliases: Arc<AliasRegistry>,
    config: ServiceConfig,
}

impl TaskService {
    /// Wire up a new service from its collaborators.
    pub fn new(
        store: Arc<dyn Backend>,
        hub: Arc<SseHub>,
        llm: Arc<FallbackManager>,
        aliases: Arc<AliasRegistry>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            serializer: Arc::new(TaskSerializer::new()),
            hub,
            llm,
            aliases,
            config,
        }
    }

    /// The store backing this service, for use by readiness checks.
    pub fn store(&self) -> &Arc<dyn Backend> {
        &self.store
    }

    /// Validate and commit `message` as a new task (or resolve it to an
    /// existing one by idempotency key), then spawn the LM call driver in
    /// the background. Returns as soon as the ingress commit lands; the
    /// caller observes further progress over `subscribe`.
    pub async fn submit_message(
        &self,
        message: NormalizedMessage,
        model_alias: Option<String>,
    ) -> Result<IngressOutcome, ServiceError> {
        let text = message.text.clone();
        let outcome = crate::ingress::submit(&self.store, message).await?;

        if outcome.created {
            info!(task_id = %outcome.task_id, "task_created");
            let ctx = Arc::new(DriverContext {
                store: self.store.clone(),
                serializer: self.serializer.clone(),
                hub: self.hub.clone(),
                llm: self.llm.clone(),
                aliases: self.aliases.clone(),
                response_summary_max_bytes: self.config.response_summary_max_bytes,
            });
            tokio::spawn(driver::run(ctx, outcome.task_id, text, model_alias));
        }

        Ok(outcome)
    }

    /// Fetch a task's projection row, full event log and artifacts.
    pub async fn get_task_detail(&self, task_id: TaskId) -> Result<TaskDetail, ServiceError> {
        let task = self.store.get_task(task_id).await?.ok_or(ServiceError::NotFound)?;
        let events = self.store.events_for(task_id).await?;
        let artifacts = self.store.list_for_task(task_id).await?;
        Ok(TaskDetail { task, events, artifacts })
    }

    /// List tasks, optionally filtered by status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, ServiceError> {
        Ok(self.store.list_tasks(status).await?)
    }

    /// Cancel a task.
    pub async fn cancel(&self, task_id: TaskId) -> Result<(), ServiceError> {
        crate::cancel::cancel(&self.store, &self.serializer, &self.hub, task_id).await?;
        Ok(())
    }

    /// Subscribe to `task_id`'s event stream, replaying from
    /// `last_event_id` (or the full log when absent) before switching to
    /// live events.
    pub fn subscribe(&self, task_id: TaskId, last_event_id: Option<EventId>) -> impl Stream<Item = SseItem> {
        taskgate_sse::subscribe_stream(
            self.hub.clone(),
            self.store.clone(),
            task_id,
            last_event_id,
            self.config.sse_heartbeat_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgate_llm::{AliasRegistry as Aliases, EchoAdapter};
    use taskgate_store_sqlite::SqliteBackend;
    use tokio_stream::StreamExt;

    async fn service() -> (TaskService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts_dir = dir.path().join("artifacts");
        let store: Arc<dyn Backend> =
            Arc::new(SqliteBackend::in_memory(artifacts_dir).await.unwrap());
        let hub = Arc::new(SseHub::default());
        let llm = Arc::new(FallbackManager::echo_only(Arc::new(EchoAdapter::new())));
        let aliases = Arc::new(Aliases::new());
        let config = ServiceConfig {
            response_summary_max_bytes: taskgate_types::DEFAULT_EVENT_PAYLOAD_MAX_BYTES,
            sse_heartbeat_interval: Duration::from_secs(15),
        };
        (TaskService::new(store, hub, llm, aliases, config), dir)
    }

    fn message(key: &str) -> NormalizedMessage {
        NormalizedMessage {
            channel: "web".into(),
            thread_id: "t1".into(),
            scope_id: None,
            sender_id: "u1".into(),
            sender_name: "User".into(),
            timestamp: 0,
            text: "Hello".into(),
            attachments: vec![],
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn submit_then_detail_reaches_succeeded() {
        let (svc, _dir) = service().await;
        let outcome = svc.submit_message(message("k1"), None).await.unwrap();
        assert!(outcome.created);

        for _ in 0..50 {
            let detail = svc.get_task_detail(outcome.task_id).await.unwrap();
            if detail.task.status == TaskStatus::Succeeded {
                assert_eq!(detail.artifacts.len(), 1);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task never reached succeeded");
    }

    #[tokio::test]
    async fn list_tasks_filters_by_status() {
        let (svc, _dir) = service().await;
        svc.submit_message(message("k2"), None).await.unwrap();
        let all = svc.list_tasks(None).await.unwrap();
        assert_eq!(all.len(), 1);
        let created_only = svc.list_tasks(Some(TaskStatus::Succeeded)).await.unwrap();
        assert!(created_only.is_empty() || created_only.len() == 1);
    }

    #[tokio::test]
    async fn cancel_unknown_task_surfaces_not_found_via_cancel_error() {
        let (svc, _dir) = service().await;
        let err = svc.cancel(TaskId::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Cancel(CancelError::NotFound)));
    }

    #[tokio::test]
    async fn subscribe_replays_task_created_first() {
        let (svc, _dir) = service().await;
        let outcome = svc.submit_message(message("k3"), None).await.unwrap();
        let mut stream = Box::pin(svc.subscribe(outcome.task_id, None));
        let first = stream.next().await.unwrap();
        match first {
            SseItem::Event(frame) => assert_eq!(frame.data.task_seq, 1),
            SseItem::Heartbeat => panic!("expected a replayed event first"),
        }
    }
}
