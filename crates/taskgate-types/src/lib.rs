#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **taskgate-types** – Shared primitive data structures for the task gateway.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O or storage: ids, the task
//! state machine, event payload shapes and artifact metadata live here, and
//! nothing else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

//─────────────────────────────
//  Size constants
//─────────────────────────────

/// Maximum length of a derived task title.
pub const MAX_TITLE_LEN: usize = 100;
/// Length a user message's text is truncated to for `USER_MESSAGE.text_preview`.
pub const MESSAGE_PREVIEW_LENGTH: usize = 200;
/// Default byte boundary beyond which an LM response summary is truncated.
pub const DEFAULT_EVENT_PAYLOAD_MAX_BYTES: usize = 8192;
/// Default byte boundary at or above which artifact content spills to a file.
pub const DEFAULT_ARTIFACT_INLINE_THRESHOLD: usize = 4096;
/// Marker appended to a truncated response summary.
pub const TRUNCATION_MARKER: &str = "... [truncated, see artifact]";

/// Errors raised by the guarded constructors in this crate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field was empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A field exceeded its maximum allowed length.
    #[error("{field} too long: {actual} > {max}")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Observed length.
        actual: usize,
        /// Maximum permitted length.
        max: usize,
    },
}

//─────────────────────────────
//  Identifiers
//─────────────────────────────

macro_rules! ulid_style_id {
    ($name:ident) => {
        /// Time-ordered, lexicographically sortable 128-bit identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new, time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wrap an existing UUID without re-deriving the timestamp.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Borrow the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

ulid_style_id!(TaskId);
ulid_style_id!(EventId);
ulid_style_id!(ArtifactId);

/// Strictly monotonic, gapless per-task event sequence number, starting at 1.
pub type TaskSeq = i64;

//─────────────────────────────
//  Task state machine
//─────────────────────────────

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task row created, no LM work started yet.
    Created,
    /// LM call in flight.
    Running,
    /// LM call completed successfully.
    Succeeded,
    /// LM call failed and no further retry is attempted.
    Failed,
    /// Cancelled by an external caller.
    Cancelled,
    // The following are reserved for forward compatibility. No transition in
    // this crate ever produces them.
    /// Reserved: not yet scheduled.
    Queued,
    /// Reserved: awaiting additional user input.
    WaitingInput,
    /// Reserved: awaiting human approval.
    WaitingApproval,
    /// Reserved: execution paused.
    Paused,
    /// Reserved: rejected before execution.
    Rejected,
}

impl TaskStatus {
    /// Whether this status accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Rejected
        )
    }

    /// Whether `self -> to` is a legal transition in the state machine.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Created, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::WaitingInput => "WAITING_INPUT",
            TaskStatus::WaitingApproval => "WAITING_APPROVAL",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Coarse risk classification surfaced to operators; not acted on by the
/// engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// No elevated risk.
    Low,
    /// Worth a human glance.
    Medium,
    /// Should be reviewed before acting on the result.
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Low
    }
}

/// Who originated an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// A human end user.
    User,
    /// The gateway or store itself.
    System,
    /// The background LM call driver.
    Worker,
    /// A tool invoked on the task's behalf (reserved, unused today).
    Tool,
    /// The process supervisor (reserved, unused today).
    Kernel,
}

//─────────────────────────────
//  Task
//─────────────────────────────

/// Identity of the caller that submitted a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Inbound channel name (e.g. "web", "slack").
    pub channel: String,
    /// Opaque sender identifier within that channel.
    pub sender_id: String,
}

/// Pointers into the event log maintained by the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPointers {
    /// `event_id` of the most recently committed event for this task.
    pub latest_event_id: EventId,
}

/// Current-state view of a task, derived strictly from its event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Primary key.
    pub task_id: TaskId,
    /// Commit time of the initial `TASK_CREATED` event.
    pub created_at: i64,
    /// Commit time of the most recent event.
    pub updated_at: i64,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Short title derived from the first user message.
    pub title: String,
    /// Conversation thread this task belongs to.
    pub thread_id: String,
    /// Optional scoping identifier (workspace, project, ...).
    pub scope_id: Option<String>,
    /// Who submitted the task.
    pub requester: Requester,
    /// Coarse risk classification.
    pub risk_level: RiskLevel,
    /// Pointers derived from the event log.
    pub pointers: TaskPointers,
}

//─────────────────────────────
//  Events
//─────────────────────────────

/// Discriminant for [`EventPayload`]; also the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Task row created.
    TaskCreated,
    /// Inbound user message recorded.
    UserMessage,
    /// Status transition.
    StateTransition,
    /// LM call dispatched.
    ModelCallStarted,
    /// LM call returned content.
    ModelCallCompleted,
    /// LM call failed.
    ModelCallFailed,
    /// An artifact was persisted.
    ArtifactCreated,
    /// A non-LM error occurred.
    Error,
}

/// Token accounting returned alongside an LM call result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens consumed by the completion.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum of prompt and completion tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Payload of a `TASK_CREATED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreatedPayload {
    /// Derived task title.
    pub title: String,
    /// Thread the task belongs to.
    pub thread_id: String,
    /// Optional scope identifier.
    #[serde(default)]
    pub scope_id: Option<String>,
    /// Inbound channel.
    pub channel: String,
    /// Opaque sender identifier.
    pub sender_id: String,
}

/// Payload of a `USER_MESSAGE` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    /// First `MESSAGE_PREVIEW_LENGTH` characters of the message text.
    pub text_preview: String,
    /// Character count of the original (untruncated) text.
    pub text_length: usize,
    /// Number of attachments on the message.
    #[serde(default)]
    pub attachment_count: usize,
}

/// Payload of a `STATE_TRANSITION` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransitionPayload {
    /// Status before the transition.
    pub from_status: TaskStatus,
    /// Status after the transition.
    pub to_status: TaskStatus,
    /// Human-readable reason for the transition, empty when none was given.
    #[serde(default)]
    pub reason: String,
}

/// Payload of a `MODEL_CALL_STARTED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCallStartedPayload {
    /// Semantic model alias requested by the caller.
    pub model_alias: String,
    /// First 100 characters of the outbound request.
    pub request_summary: String,
}

/// Payload of a `MODEL_CALL_COMPLETED` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCallCompletedPayload {
    /// Semantic model alias requested by the caller.
    pub model_alias: String,
    /// Concrete model name that served the call.
    pub model_name: String,
    /// Provider identifier (e.g. "anthropic", "echo").
    pub provider: String,
    /// UTF-8-safe truncation of the response content.
    pub response_summary: String,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,
    /// Token accounting for the call.
    #[serde(default)]
    pub token_usage: TokenUsage,
    /// Derived cost in US dollars, `0.0` when unavailable.
    #[serde(default)]
    pub cost_usd: f64,
    /// Whether cost could not be derived.
    #[serde(default)]
    pub cost_unavailable: bool,
    /// Whether the fallback adapter served this call.
    #[serde(default)]
    pub is_fallback: bool,
    /// Artifact holding the full (untruncated) response.
    pub artifact_ref: ArtifactId,
}

/// Payload of a `MODEL_CALL_FAILED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCallFailedPayload {
    /// Semantic model alias requested by the caller.
    pub model_alias: String,
    /// Concrete model name, if known before the failure.
    #[serde(default)]
    pub model_name: String,
    /// Provider identifier, if known before the failure.
    #[serde(default)]
    pub provider: String,
    /// Error classification (e.g. "proxy_unreachable", "provider_error").
    pub error_type: String,
    /// Sanitized, user-facing error message.
    pub error_message: String,
    /// Wall-clock duration before failure, in milliseconds.
    pub duration_ms: u64,
    /// Whether this failure occurred while already running as fallback.
    #[serde(default)]
    pub is_fallback: bool,
}

/// Payload of an `ARTIFACT_CREATED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCreatedPayload {
    /// Identifier of the created artifact.
    pub artifact_id: ArtifactId,
    /// Artifact name.
    pub name: String,
    /// Byte size of the artifact content.
    pub size: u64,
    /// Number of parts in the artifact.
    pub part_count: usize,
}

/// Coarse classification for `ERROR` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Error surfaced by the LM.
    Model,
    /// Error surfaced by a tool (reserved, unused today).
    Tool,
    /// Error surfaced by the system itself.
    System,
    /// Error in business-level validation.
    Business,
}

/// Payload of an `ERROR` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Coarse classification.
    pub error_type: ErrorKind,
    /// Human-readable message.
    pub error_message: String,
    /// Whether the system is expected to recover without intervention.
    pub recoverable: bool,
    /// Optional hint for how to recover.
    #[serde(default)]
    pub recovery_hint: Option<String>,
}

/// Tagged union over every event payload shape. Exactly one variant exists
/// per [`EventType`]; new fields on an existing variant must carry
/// `#[serde(default)]` so that older stored payloads keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    /// See [`TaskCreatedPayload`].
    TaskCreated(TaskCreatedPayload),
    /// See [`UserMessagePayload`].
    UserMessage(UserMessagePayload),
    /// See [`StateTransitionPayload`].
    StateTransition(StateTransitionPayload),
    /// See [`ModelCallStartedPayload`].
    ModelCallStarted(ModelCallStartedPayload),
    /// See [`ModelCallCompletedPayload`].
    ModelCallCompleted(ModelCallCompletedPayload),
    /// See [`ModelCallFailedPayload`].
    ModelCallFailed(ModelCallFailedPayload),
    /// See [`ArtifactCreatedPayload`].
    ArtifactCreated(ArtifactCreatedPayload),
    /// See [`ErrorPayload`].
    Error(ErrorPayload),
}

impl EventPayload {
    /// The [`EventType`] this payload corresponds to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::TaskCreated(_) => EventType::TaskCreated,
            EventPayload::UserMessage(_) => EventType::UserMessage,
            EventPayload::StateTransition(_) => EventType::StateTransition,
            EventPayload::ModelCallStarted(_) => EventType::ModelCallStarted,
            EventPayload::ModelCallCompleted(_) => EventType::ModelCallCompleted,
            EventPayload::ModelCallFailed(_) => EventType::ModelCallFailed,
            EventPayload::ArtifactCreated(_) => EventType::ArtifactCreated,
            EventPayload::Error(_) => EventType::Error,
        }
    }

    /// `true` when this payload is a `STATE_TRANSITION` into a terminal
    /// status; used by the SSE hub to decide when to close a stream.
    pub fn is_final_transition(&self) -> bool {
        matches!(self, EventPayload::StateTransition(p) if p.to_status.is_terminal())
    }
}

/// A single, immutable entry in a task's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Primary key.
    pub event_id: EventId,
    /// Owning task.
    pub task_id: TaskId,
    /// Strictly monotonic, gapless per-task sequence number starting at 1.
    pub task_seq: i64,
    /// Commit timestamp (unix millis).
    pub ts: i64,
    /// Schema version of `payload`.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Who produced this event.
    pub actor: ActorType,
    /// Typed payload.
    pub payload: EventPayload,
    /// Distributed-tracing trace identifier.
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Distributed-tracing span identifier.
    #[serde(default)]
    pub span_id: Option<String>,
    /// Event this one is causally derived from, if any.
    #[serde(default)]
    pub parent_event_id: Option<EventId>,
    /// Idempotency key supplied at ingress, present only on `TASK_CREATED`.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}

impl Event {
    /// The [`EventType`] of this event's payload.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

//─────────────────────────────
//  Artifacts
//─────────────────────────────

/// Content-kind discriminant for an [`ArtifactPart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
    /// Plain text content.
    Text,
    /// A reference to an external file.
    File,
    /// Structured JSON content.
    Json,
    /// Image content.
    Image,
}

/// One ordered segment of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPart {
    /// Kind of content carried by this part.
    #[serde(rename = "type")]
    pub part_type: PartType,
    /// MIME type of the content.
    pub mime: String,
    /// Inline content, present when the artifact was not spilled to disk.
    #[serde(default)]
    pub content: Option<String>,
    /// External reference, present when content lives outside the part.
    #[serde(default)]
    pub uri: Option<String>,
}

/// A persisted LM output (or other task byproduct).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Primary key.
    pub artifact_id: ArtifactId,
    /// Owning task.
    pub task_id: TaskId,
    /// Creation timestamp (unix millis).
    pub ts: i64,
    /// Display name.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered content parts.
    pub parts: Vec<ArtifactPart>,
    /// Path to spilled content, `None` when inlined.
    #[serde(default)]
    pub storage_ref: Option<String>,
    /// Byte size of the content.
    pub size: u64,
    /// Lowercase hex-encoded SHA-256 of the content.
    pub sha256: String,
    /// Monotonically increasing version (reserved for future revisions).
    #[serde(default = "default_artifact_version")]
    pub version: u32,
}

fn default_artifact_version() -> u32 {
    1
}

//─────────────────────────────
//  Ingress message
//─────────────────────────────

/// Metadata for an attachment referenced by a [`NormalizedMessage`]. Bytes
/// are not carried here; only enough to record provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Caller-assigned identifier.
    pub id: String,
    /// MIME type.
    pub mime: String,
    /// Original filename, if known.
    #[serde(default)]
    pub filename: Option<String>,
    /// Byte size.
    pub size: u64,
    /// Where the bytes live (this crate does not ingest them).
    pub storage_ref: String,
}

/// A validated inbound message ready to be turned into a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Inbound channel name.
    pub channel: String,
    /// Conversation thread identifier.
    pub thread_id: String,
    /// Optional scoping identifier.
    #[serde(default)]
    pub scope_id: Option<String>,
    /// Opaque sender identifier.
    pub sender_id: String,
    /// Human-readable sender name.
    pub sender_name: String,
    /// Client-supplied timestamp (unix millis).
    pub timestamp: i64,
    /// Message body.
    pub text: String,
    /// Attached files, if any.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Caller-supplied deduplication key; required.
    pub idempotency_key: String,
}

impl NormalizedMessage {
    /// Validate field lengths. Empty `text` is explicitly allowed (see
    /// boundary behaviors); an empty `idempotency_key` is not.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.idempotency_key.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "idempotency_key",
            });
        }
        if self.channel.trim().is_empty() {
            return Err(ValidationError::Empty { field: "channel" });
        }
        if self.thread_id.trim().is_empty() {
            return Err(ValidationError::Empty { field: "thread_id" });
        }
        if self.sender_id.trim().is_empty() {
            return Err(ValidationError::Empty { field: "sender_id" });
        }
        Ok(())
    }

    /// Derive a task title from the message text, truncated to
    /// [`MAX_TITLE_LEN`] characters.
    pub fn derive_title(&self) -> String {
        truncate_chars(&self.text, MAX_TITLE_LEN)
    }

    /// Derive the `USER_MESSAGE.text_preview` field.
    pub fn text_preview(&self) -> String {
        truncate_chars(&self.text, MESSAGE_PREVIEW_LENGTH)
    }
}

/// Truncate `s` to at most `max_chars` Unicode scalar values.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// UTF-8-safe truncation of `s` to at most `max_bytes` bytes, never
/// splitting a multi-byte character. Appends [`TRUNCATION_MARKER`] when
/// truncation occurred.
pub fn truncate_utf8_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
