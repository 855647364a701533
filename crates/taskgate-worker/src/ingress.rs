//! Turns a [`NormalizedMessage`] into a task, idempotently.
//!
//! Mirrors §4.3: the caller checks `find_by_idempotency` first so a
//! straightforward duplicate never even reaches a write; `commit_initial`
//! is still the source of truth for a concurrent duplicate that races past
//! that check, since the store re-reads on `IdempotencyConflict` rather
//! than erroring.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use taskgate_store_core::{Backend, IngressOutcome, StoreError};
use taskgate_types::{
    ActorType, Event, EventId, EventPayload, NormalizedMessage, Requester, Task, TaskCreatedPayload,
    TaskId, TaskPointers, TaskStatus, UserMessagePayload, ValidationError,
};

/// Errors raised while turning a message into a task.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The inbound message failed field validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    /// The store rejected the write for a reason the caller cannot recover
    /// from inline (anything other than the idempotency race, which is
    /// handled internally).
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Validate `message` and commit it as a new task, or resolve it to an
/// already-existing one by idempotency key.
pub async fn submit(
    store: &Arc<dyn Backend>,
    message: NormalizedMessage,
) -> Result<IngressOutcome, IngressError> {
    message.validate()?;

    if let Some(existing) = store.find_by_idempotency(&message.idempotency_key).await? {
        return Ok(IngressOutcome {
            task_id: existing,
            created: false,
        });
    }

    let task_id = TaskId::new();
    let now = now_millis();
    let title = message.derive_title();
    let scope_id = message
        .scope_id
        .clone()
        .unwrap_or_else(|| format!("chat:{}:{}", message.channel, message.thread_id));

    let created_event = Event {
        event_id: EventId::new(),
        task_id,
        task_seq: 1,
        ts: now,
        schema_version: 1,
        actor: ActorType::System,
        payload: EventPayload::TaskCreated(TaskCreatedPayload {
            title: title.clone(),
            thread_id: message.thread_id.clone(),
            scope_id: Some(scope_id.clone()),
            channel: message.channel.clone(),
            sender_id: message.sender_id.clone(),
        }),
        trace_id: Some(format!("trace-{task_id}")),
        span_id: None,
        parent_event_id: None,
        idempotency_key: Some(message.idempotency_key.clone()),
    };

    let message_event = Event {
        event_id: EventId::new(),
        task_id,
        task_seq: 2,
        ts: now,
        schema_version: 1,
        actor: ActorType::User,
        payload: EventPayload::UserMessage(UserMessagePayload {
            text_preview: message.text_preview(),
            text_length: message.text.chars().count(),
            attachment_count: message.attachments.len(),
        }),
        trace_id: created_event.trace_id.clone(),
        span_id: None,
        parent_event_id: Some(created_event.event_id),
        idempotency_key: None,
    };

    let task = Task {
        task_id,
        created_at: now,
        updated_at: now,
        status: TaskStatus::Created,
        title,
        thread_id: message.thread_id,
        scope_id: Some(scope_id),
        requester: Requester {
            channel: message.channel,
            sender_id: message.sender_id,
        },
        risk_level: taskgate_types::RiskLevel::Low,
        pointers: TaskPointers {
            latest_event_id: message_event.event_id,
        },
    };

    let outcome = store
        .commit_initial(task, vec![created_event.clone(), message_event.clone()])
        .await?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use taskgate_store_sqlite::SqliteBackend;

    async fn backend() -> Arc<dyn Backend> {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::in_memory(PathBuf::from(dir.path()).join("artifacts"))
            .await
            .unwrap();
        Arc::new(backend)
    }

    fn message(idempotency_key: &str) -> NormalizedMessage {
        NormalizedMessage {
            channel: "web".into(),
            thread_id: "t1".into(),
            scope_id: None,
            sender_id: "u1".into(),
            sender_name: "User".into(),
            timestamp: 0,
            text: "Hello OctoAgent".into(),
            attachments: vec![],
            idempotency_key: idempotency_key.to_string(),
        }
    }

    #[tokio::test]
    async fn new_message_creates_exactly_one_task() {
        let store = backend().await;
        let outcome = submit(&store, message("k1")).await.unwrap();
        assert!(outcome.created);
        let events = store.events_for(outcome.task_id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_same_task_without_new_events() {
        let store = backend().await;
        let first = submit(&store, message("k2")).await.unwrap();
        let second = submit(&store, message("k2")).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.task_id, second.task_id);
        let events = store.events_for(first.task_id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn empty_text_is_accepted_with_empty_title_and_preview() {
        let store = backend().await;
        let mut msg = message("k3");
        msg.text = String::new();
        let outcome = submit(&store, msg).await.unwrap();
        let task = store.get_task(outcome.task_id).await.unwrap().unwrap();
        assert_eq!(task.title, "");
    }

    #[tokio::test]
    async fn blank_idempotency_key_is_rejected() {
        let store = backend().await;
        let mut msg = message("  ");
        msg.idempotency_key = "   ".into();
        let err = submit(&store, msg).await.unwrap_err();
        assert!(matches!(err, IngressError::Validation(_)));
    }
}
