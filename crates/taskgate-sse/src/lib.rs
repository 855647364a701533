#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **taskgate-sse** – In-memory publish/subscribe hub that couples the
//! persisted event log to live server-sent-event subscribers.
//!
//! [`SseHub`] owns a `task_id -> subscribers` map. `broadcast` is a
//! non-blocking enqueue into each subscriber's bounded channel; a
//! subscriber whose channel is full is dropped rather than allowed to
//! stall the writer (§4.7). [`subscribe_stream`] produces the
//! replay-then-live [`SseItem`] stream a gateway handler forwards onto the
//! wire, honoring `Last-Event-ID` and emitting periodic heartbeats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use taskgate_store_core::TaskEventStore;
use taskgate_types::{ActorType, Event, EventId, EventPayload, TaskId, TaskSeq};

/// Default bound on a single subscriber's pending-event queue.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;
/// Default period between heartbeat comments while no event is flowing.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// One item of the SSE stream a gateway handler renders to wire format.
#[derive(Debug, Clone)]
pub enum SseItem {
    /// A persisted event, framed for SSE.
    Event(SseFrame),
    /// Emit an `:heartbeat` comment; no `id`/`event`/`data` lines.
    Heartbeat,
}

/// Wire-ready representation of one event: `id` is the SSE id, `event` is
/// the SSE event name, `data` is the JSON payload line.
#[derive(Debug, Clone, Serialize)]
pub struct SseFrame {
    /// SSE `id:` field — the event's `event_id`.
    pub id: String,
    /// SSE `event:` field — the event's type name.
    pub event: String,
    /// SSE `data:` field, serialized as one JSON object.
    pub data: SseDataRecord,
}

/// JSON body of one SSE `data:` line.
#[derive(Debug, Clone, Serialize)]
pub struct SseDataRecord {
    /// Event identifier.
    pub event_id: EventId,
    /// Owning task.
    pub task_id: TaskId,
    /// Per-task sequence number.
    pub task_seq: TaskSeq,
    /// Commit timestamp (unix millis).
    pub ts: i64,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Who produced the event.
    pub actor: ActorType,
    /// Typed payload.
    pub payload: EventPayload,
    /// `true` when this event is a `STATE_TRANSITION` into a terminal
    /// status; the consumer should close the stream after receiving it.
    pub r#final: bool,
}

impl SseFrame {
    fn from_event(event: &Event) -> Self {
        let event_type = format!("{:?}", event.event_type());
        Self {
            id: event.event_id.to_string(),
            event: screaming_snake(&event_type),
            data: SseDataRecord {
                event_id: event.event_id,
                task_id: event.task_id,
                task_seq: event.task_seq,
                ts: event.ts,
                event_type: screaming_snake(&event_type),
                actor: event.actor,
                payload: event.payload.clone(),
                r#final: event.payload.is_final_transition(),
            },
        }
    }
}

fn screaming_snake(camel: &str) -> String {
    let mut out = String::new();
    for (i, ch) in camel.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

/// In-memory fan-out hub: one bounded queue per subscriber, keyed by
/// `task_id`. Cheap to clone (wrap in `Arc`); internally it is just a
/// `DashMap`, so no external locking is required.
pub struct SseHub {
    subscribers: DashMap<TaskId, Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for SseHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl SseHub {
    /// Construct a hub whose subscriber queues hold at most `capacity`
    /// pending events before being considered dead.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Non-blocking publish to every live subscriber of `task_id`. A
    /// subscriber whose queue is full or whose receiver has been dropped is
    /// removed; the writer never waits on a slow consumer.
    pub fn broadcast(&self, task_id: TaskId, event: Event) {
        let Some(mut subs) = self.subscribers.get_mut(&task_id) else {
            return;
        };
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(task_id = %task_id, subscriber = sub.id, "sse_subscriber_dropped_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Current number of live subscribers across all tasks (for tests and
    /// diagnostics).
    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.subscribers.get(&task_id).map(|s| s.len()).unwrap_or(0)
    }

    fn register(&self, task_id: TaskId) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.entry(task_id).or_default().push(Subscriber { id, tx });
        (id, rx)
    }

    fn unregister(&self, task_id: TaskId, id: u64) {
        if let Some(mut subs) = self.subscribers.get_mut(&task_id) {
            subs.retain(|s| s.id != id);
        }
    }
}

struct UnregisterGuard {
    hub: Arc<SseHub>,
    task_id: TaskId,
    id: u64,
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.task_id, self.id);
    }
}

/// Build the replay-then-live stream for a subscriber of `task_id`.
///
/// Registers with the hub before reading history so that any event
/// published while history is being read is queued, not lost (§4.7
/// Ordering). Replays `events_after(last_event_id)` (or the full log when
/// `last_event_id` is `None`); if the task is already terminal the stream
/// ends after the final event without switching to live. Otherwise it
/// drains the live queue, discarding anything with `task_seq` not strictly
/// greater than the last replayed sequence, and emits a heartbeat after
/// `heartbeat_interval` of silence.
pub fn subscribe_stream(
    hub: Arc<SseHub>,
    store: Arc<dyn TaskEventStore>,
    task_id: TaskId,
    last_event_id: Option<EventId>,
    heartbeat_interval: Duration,
) -> impl Stream<Item = SseItem> {
    stream! {
        let (id, mut rx) = hub.register(task_id);
        let _guard = UnregisterGuard { hub: hub.clone(), task_id, id };

        let replay = match last_event_id {
            Some(after) => store.events_after(task_id, after).await,
            None => store.events_for(task_id).await,
        };
        let replay = match replay {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "sse_replay_read_failed");
                Vec::new()
            }
        };

        let mut last_seq: TaskSeq = 0;
        let mut closed = false;
        for event in &replay {
            last_seq = event.task_seq;
            let is_final = event.payload.is_final_transition();
            yield SseItem::Event(SseFrame::from_event(event));
            if is_final {
                closed = true;
                break;
            }
        }

        if closed {
            return;
        }

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if event.task_seq <= last_seq {
                                continue;
                            }
                            last_seq = event.task_seq;
                            let is_final = event.payload.is_final_transition();
                            yield SseItem::Event(SseFrame::from_event(&event));
                            if is_final {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(heartbeat_interval) => {
                    yield SseItem::Heartbeat;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgate_store_core::{ArtifactStore as _, IngressOutcome, StoreResult};
    use taskgate_types::{
        ActorType, ArtifactId, EventId, StateTransitionPayload, Task, TaskCreatedPayload,
        TaskStatus, UserMessagePayload,
    };
    use tokio_stream::StreamExt;

    /// Minimal in-memory fake satisfying just enough of `TaskEventStore`
    /// for stream tests; the SQLite-backed implementation is exercised in
    /// `taskgate-store-sqlite`.
    struct FakeStore {
        events: std::sync::Mutex<Vec<Event>>,
    }

    #[async_trait::async_trait]
    impl TaskEventStore for FakeStore {
        async fn commit_initial(&self, _task: Task, _events: Vec<Event>) -> StoreResult<IngressOutcome> {
            unimplemented!()
        }
        async fn commit_transition(
            &self,
            _event: Event,
            _new_status: TaskStatus,
            _expected_status: Option<TaskStatus>,
        ) -> StoreResult<()> {
            unimplemented!()
        }
        async fn commit_progress(&self, _event: Event) -> StoreResult<()> {
            unimplemented!()
        }
        async fn next_task_seq(&self, _task_id: TaskId) -> StoreResult<i64> {
            unimplemented!()
        }
        async fn events_for(&self, task_id: TaskId) -> StoreResult<Vec<Event>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.task_id == task_id)
                .cloned()
                .collect())
        }
        async fn events_after(&self, task_id: TaskId, after: EventId) -> StoreResult<Vec<Event>> {
            let events = self.events.lock().unwrap();
            let after_seq = events
                .iter()
                .find(|e| e.event_id == after)
                .map(|e| e.task_seq)
                .unwrap_or(0);
            Ok(events
                .iter()
                .filter(|e| e.task_id == task_id && e.task_seq > after_seq)
                .cloned()
                .collect())
        }
        async fn find_by_idempotency(&self, _key: &str) -> StoreResult<Option<TaskId>> {
            unimplemented!()
        }
        async fn get_task(&self, _task_id: TaskId) -> StoreResult<Option<Task>> {
            unimplemented!()
        }
        async fn list_tasks(&self, _status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
            unimplemented!()
        }
        async fn force_failed_without_event(&self, _task_id: TaskId) -> StoreResult<()> {
            unimplemented!()
        }
    }

    fn created(task_id: TaskId, seq: i64) -> Event {
        Event {
            event_id: EventId::new(),
            task_id,
            task_seq: seq,
            ts: seq,
            schema_version: 1,
            actor: ActorType::User,
            payload: EventPayload::TaskCreated(TaskCreatedPayload {
                title: "t".into(),
                thread_id: "th".into(),
                scope_id: None,
                channel: "web".into(),
                sender_id: "u".into(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: Some("k".into()),
        }
    }

    fn transition(task_id: TaskId, seq: i64, from: TaskStatus, to: TaskStatus) -> Event {
        Event {
            event_id: EventId::new(),
            task_id,
            task_seq: seq,
            ts: seq,
            schema_version: 1,
            actor: ActorType::System,
            payload: EventPayload::StateTransition(StateTransitionPayload {
                from_status: from,
                to_status: to,
                reason: String::new(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn broadcast_to_full_queue_drops_the_subscriber() {
        let hub = SseHub::new(1);
        let task_id = TaskId::new();
        let (id, _rx) = hub.register(task_id);
        assert_eq!(hub.subscriber_count(task_id), 1);

        hub.broadcast(task_id, created(task_id, 1));
        hub.broadcast(task_id, created(task_id, 2));
        assert_eq!(hub.subscriber_count(task_id), 0);
        let _ = id;
    }

    #[tokio::test]
    async fn replay_then_close_on_terminal_event() {
        let task_id = TaskId::new();
        let store: Arc<dyn TaskEventStore> = Arc::new(FakeStore {
            events: std::sync::Mutex::new(vec![
                created(task_id, 1),
                transition(task_id, 2, TaskStatus::Created, TaskStatus::Succeeded),
            ]),
        });
        let hub = Arc::new(SseHub::new(10));
        let stream = subscribe_stream(hub, store, task_id, None, Duration::from_secs(30));
        tokio::pin!(stream);

        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item);
        }
        assert_eq!(items.len(), 2);
        match &items[1] {
            SseItem::Event(frame) => assert!(frame.data.r#final),
            SseItem::Heartbeat => panic!("expected final event"),
        }
    }

    #[tokio::test]
    async fn live_events_deduplicate_against_replay_cutoff() {
        let task_id = TaskId::new();
        let store: Arc<dyn TaskEventStore> = Arc::new(FakeStore {
            events: std::sync::Mutex::new(vec![created(task_id, 1)]),
        });
        let hub = Arc::new(SseHub::new(10));
        let stream = subscribe_stream(hub.clone(), store, task_id, None, Duration::from_secs(30));
        tokio::pin!(stream);

        // First item is the replayed TASK_CREATED.
        let first = stream.next().await.unwrap();
        assert!(matches!(first, SseItem::Event(_)));

        // A duplicate of already-replayed seq 1 must be skipped; a fresh
        // seq 2 must come through.
        hub.broadcast(task_id, created(task_id, 1));
        hub.broadcast(task_id, transition(task_id, 2, TaskStatus::Created, TaskStatus::Cancelled));

        let second = stream.next().await.unwrap();
        match second {
            SseItem::Event(frame) => assert_eq!(frame.data.task_seq, 2),
            SseItem::Heartbeat => panic!("expected the seq-2 event, not a heartbeat"),
        }
    }
}
