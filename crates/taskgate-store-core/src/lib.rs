#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **taskgate-store-core** – Storage abstractions for the task gateway.
//!
//! This crate defines the contracts for the event-sourced task store without
//! providing a concrete implementation: the transactional writer primitives
//! (`commit_initial`, `commit_transition`, `commit_progress`, ...), the
//! read-side queries the gateway and SSE hub need, and the artifact store.
//! A concrete backend (SQLite today) lives in a separate crate and implements
//! these traits.

use async_trait::async_trait;
use taskgate_types::{Artifact, ArtifactId, Event, EventId, Task, TaskId, TaskStatus};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors raised by a [`TaskEventStore`] or [`ArtifactStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `(task_id, task_seq)` already exists; caller should retry with a
    /// fresh sequence number, bounded by `MAX_SEQ_RETRIES`.
    #[error("sequence conflict for task {task_id} at seq {task_seq}")]
    SequenceConflict {
        /// Task the conflicting append targeted.
        task_id: TaskId,
        /// Sequence number that was already taken.
        task_seq: i64,
    },
    /// The supplied `idempotency_key` is already associated with a task.
    #[error("idempotency key already in use: {key}")]
    IdempotencyConflict {
        /// The key that collided.
        key: String,
    },
    /// `expected_status` did not match the task's current status.
    #[error("status conflict for task {task_id}: expected {expected}, found {actual}")]
    StatusConflict {
        /// Task whose status did not match.
        task_id: TaskId,
        /// Status the caller expected.
        expected: TaskStatus,
        /// Status actually found.
        actual: TaskStatus,
    },
    /// `from -> to` is not a legal transition.
    #[error("illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        /// Task the transition targeted.
        task_id: TaskId,
        /// Status the task was in.
        from: TaskStatus,
        /// Status that was requested.
        to: TaskStatus,
    },
    /// Requested entity does not exist.
    #[error("not found")]
    NotFound,
    /// The task is in a terminal state and accepts no further transitions.
    #[error("task {task_id} is already terminal ({status})")]
    AlreadyTerminal {
        /// Task that was already terminal.
        task_id: TaskId,
        /// The terminal status found.
        status: TaskStatus,
    },
    /// Catch-all for backend-specific failures (I/O, driver errors, ...).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Convenience result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

//─────────────────────────────
//  Task + event store
//─────────────────────────────

/// Outcome of an idempotent ingress write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressOutcome {
    /// The task the caller should operate on.
    pub task_id: TaskId,
    /// `true` when this call actually created a new task.
    pub created: bool,
}

/// Transactional writer and reader over the task/event log.
///
/// Every mutating method is implemented as a single atomic commit spanning
/// both the event append and the derived projection update; callers never
/// observe one without the other.
#[async_trait]
pub trait TaskEventStore: Send + Sync {
    /// Create the projection row and append `[TASK_CREATED, USER_MESSAGE]`
    /// atomically. If `events[0].idempotency_key` is already associated with
    /// a task, returns that task's id with `created = false` instead of
    /// erroring.
    async fn commit_initial(&self, task: Task, events: Vec<Event>) -> StoreResult<IngressOutcome>;

    /// Append a `STATE_TRANSITION` event and update the projection's status,
    /// `updated_at` and `pointers.latest_event_id` atomically. When
    /// `expected_status` is `Some` and the task's current status differs,
    /// the whole commit is rolled back and [`StoreError::StatusConflict`] is
    /// returned.
    async fn commit_transition(
        &self,
        event: Event,
        new_status: TaskStatus,
        expected_status: Option<TaskStatus>,
    ) -> StoreResult<()>;

    /// Append a non-transition event and refresh `updated_at` +
    /// `pointers.latest_event_id` atomically; status is left untouched.
    async fn commit_progress(&self, event: Event) -> StoreResult<()>;

    /// Allocate the next `task_seq` for `task_id` (1 for a brand new task).
    /// Callers are expected to hold the per-task serializer lock while
    /// calling this and appending, but the store still enforces uniqueness
    /// of `(task_id, task_seq)` independently.
    async fn next_task_seq(&self, task_id: TaskId) -> StoreResult<i64>;

    /// All events for `task_id`, ordered by `task_seq` ascending.
    async fn events_for(&self, task_id: TaskId) -> StoreResult<Vec<Event>>;

    /// Events for `task_id` with `event_id > after_event_id`, ordered by
    /// `task_seq` ascending. Used to resume an SSE stream from
    /// `Last-Event-ID`.
    async fn events_after(&self, task_id: TaskId, after_event_id: EventId)
        -> StoreResult<Vec<Event>>;

    /// Resolve a previously used idempotency key to its task, if any.
    async fn find_by_idempotency(&self, key: &str) -> StoreResult<Option<TaskId>>;

    /// Fetch the current projection row for `task_id`.
    async fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>>;

    /// List tasks, most recently created first, optionally filtered by
    /// status.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>>;

    /// Force a task directly to `FAILED` without an accompanying event, for
    /// use only when appending the failure event itself has failed. A task
    /// must never be left stuck in `RUNNING`.
    async fn force_failed_without_event(&self, task_id: TaskId) -> StoreResult<()>;
}

//─────────────────────────────
//  Artifact store
//─────────────────────────────

/// Content-addressed store for artifacts (typically LM responses).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `content` as a new artifact under `task_id`. Content at or
    /// above the configured inline threshold is spilled to a file and
    /// referenced by `storage_ref`; smaller content is inlined. Always
    /// computes `sha256` and `size` regardless of storage strategy.
    async fn put(
        &self,
        task_id: TaskId,
        name: &str,
        description: Option<&str>,
        mime: &str,
        content: &[u8],
    ) -> StoreResult<Artifact>;

    /// Fetch artifact metadata by id.
    async fn get(&self, artifact_id: ArtifactId) -> StoreResult<Option<Artifact>>;

    /// Fetch an artifact's content bytes, preferring `storage_ref` on disk
    /// and falling back to inline part content.
    async fn get_content(&self, artifact_id: ArtifactId) -> StoreResult<Option<Vec<u8>>>;

    /// List artifacts for a task, ordered by `ts` ascending.
    async fn list_for_task(&self, task_id: TaskId) -> StoreResult<Vec<Artifact>>;
}

//─────────────────────────────
//  Projection rebuild
//─────────────────────────────

/// Offline utility that reconstructs the task projection by replaying the
/// full event log. Implemented by the concrete backend since it requires
/// backend-specific transactional truncate-and-reinsert support.
#[async_trait]
pub trait ProjectionRebuilder: Send + Sync {
    /// Replay every event ordered by `(task_id, task_seq)`, recompute every
    /// task's projection row in memory, then atomically truncate and
    /// reinsert the projection table. Returns the number of tasks
    /// rebuilt.
    async fn rebuild(&self) -> StoreResult<usize>;
}

//─────────────────────────────
//  Combined backend
//─────────────────────────────

/// A storage backend that plays all three roles at once, the way
/// `SqliteBackend` does. Callers that just need "the store" (the gateway,
/// the LM call driver) depend on this instead of naming all three traits.
pub trait Backend: TaskEventStore + ArtifactStore + ProjectionRebuilder {}

impl<T: TaskEventStore + ArtifactStore + ProjectionRebuilder + ?Sized> Backend for T {}
