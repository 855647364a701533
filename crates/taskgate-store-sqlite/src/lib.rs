#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **taskgate-store-sqlite** – SQLite-backed transactional event store,
//! projection, artifact store and rebuilder for the task gateway.
//!
//! The schema holds three tables: `tasks` (the projection), `events` (the
//! append-only log) and `artifacts` (content-addressed metadata). All
//! mutating operations on [`TaskEventStore`] commit the event append and the
//! projection update in one SQLite transaction, so external readers never
//! observe one without the other.

pub mod serializer;

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, Row, SqlitePool};

use taskgate_store_core::{ArtifactStore, IngressOutcome, ProjectionRebuilder, StoreError, StoreResult, TaskEventStore};
use taskgate_types::{
    Artifact, ArtifactId, ArtifactPart, Event, EventId, EventPayload, PartType, Task,
    TaskId, TaskPointers, TaskStatus,
};

pub use serializer::{TaskSerializer, MAX_SEQ_RETRIES};

/// Byte boundary at or above which [`SqliteArtifactStore::put`] spills
/// content to a file instead of inlining it.
const DEFAULT_ARTIFACT_INLINE_THRESHOLD: u64 = taskgate_types::DEFAULT_ARTIFACT_INLINE_THRESHOLD as u64;

/// A SQLite-backed implementation of [`TaskEventStore`], [`ArtifactStore`]
/// and [`ProjectionRebuilder`], sharing one connection pool across all three
/// roles (matching the single-database layout in the interface spec).
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    artifacts_root: PathBuf,
    inline_threshold: u64,
}

impl SqliteBackend {
    /// Open (creating if absent) a SQLite database at `path` in WAL mode
    /// with a 5 second busy timeout and foreign keys enabled, running
    /// migrations, and rooting spilled artifact content at `artifacts_root`.
    pub async fn open(path: impl AsRef<Path>, artifacts_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_millis(5000))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("failed to open sqlite database")?;
        Self::from_pool(pool, artifacts_root).await
    }

    /// Open an in-memory database, useful for tests.
    pub async fn in_memory(artifacts_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open in-memory sqlite database")?;
        Self::from_pool(pool, artifacts_root).await
    }

    async fn from_pool(pool: SqlitePool, artifacts_root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let backend = Self {
            pool,
            artifacts_root: artifacts_root.into(),
            inline_threshold: DEFAULT_ARTIFACT_INLINE_THRESHOLD,
        };
        backend.migrate().await?;
        Ok(backend)
    }

    /// Override the inline/spill threshold (default 4 KiB); used by tests
    /// that probe the boundary.
    pub fn with_inline_threshold(mut self, threshold: u64) -> Self {
        self.inline_threshold = threshold;
        self
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                title TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                scope_id TEXT,
                channel TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                risk_level TEXT NOT NULL,
                latest_event_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_thread_id ON tasks(thread_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                task_seq INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                schema_version INTEGER NOT NULL,
                actor TEXT NOT NULL,
                payload TEXT NOT NULL,
                trace_id TEXT,
                span_id TEXT,
                parent_event_id TEXT,
                idempotency_key TEXT,
                FOREIGN KEY (task_id) REFERENCES tasks(task_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_task_seq ON events(task_id, task_seq)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_task_ts ON events(task_id, ts)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency_key ON events(idempotency_key) WHERE idempotency_key IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                parts TEXT NOT NULL,
                storage_ref TEXT,
                size INTEGER NOT NULL,
                sha256 TEXT NOT NULL,
                version INTEGER NOT NULL,
                FOREIGN KEY (task_id) REFERENCES tasks(task_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifacts_task_id ON artifacts(task_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Borrow the underlying pool, e.g. for a readiness probe.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Task> {
    let task_id: String = row.try_get("task_id")?;
    let status: String = row.try_get("status")?;
    let latest_event_id: String = row.try_get("latest_event_id")?;
    let risk_level: String = row.try_get("risk_level")?;
    Ok(Task {
        task_id: task_id.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        status: parse_status(&status)?,
        title: row.try_get("title")?,
        thread_id: row.try_get("thread_id")?,
        scope_id: row.try_get("scope_id")?,
        requester: taskgate_types::Requester {
            channel: row.try_get("channel")?,
            sender_id: row.try_get("sender_id")?,
        },
        risk_level: parse_risk(&risk_level)?,
        pointers: TaskPointers {
            latest_event_id: latest_event_id.parse()?,
        },
    })
}

fn parse_status(s: &str) -> anyhow::Result<TaskStatus> {
    Ok(match s {
        "CREATED" => TaskStatus::Created,
        "RUNNING" => TaskStatus::Running,
        "SUCCEEDED" => TaskStatus::Succeeded,
        "FAILED" => TaskStatus::Failed,
        "CANCELLED" => TaskStatus::Cancelled,
        "QUEUED" => TaskStatus::Queued,
        "WAITING_INPUT" => TaskStatus::WaitingInput,
        "WAITING_APPROVAL" => TaskStatus::WaitingApproval,
        "PAUSED" => TaskStatus::Paused,
        "REJECTED" => TaskStatus::Rejected,
        other => anyhow::bail!("unknown task status in storage: {other}"),
    })
}

fn parse_risk(s: &str) -> anyhow::Result<taskgate_types::RiskLevel> {
    use taskgate_types::RiskLevel::*;
    Ok(match s {
        "low" => Low,
        "medium" => Medium,
        "high" => High,
        other => anyhow::bail!("unknown risk level in storage: {other}"),
    })
}

fn risk_str(r: taskgate_types::RiskLevel) -> &'static str {
    use taskgate_types::RiskLevel::*;
    match r {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Event> {
    let event_id: String = row.try_get("event_id")?;
    let task_id: String = row.try_get("task_id")?;
    let actor: String = row.try_get("actor")?;
    let payload_json: String = row.try_get("payload")?;
    let parent_event_id: Option<String> = row.try_get("parent_event_id")?;
    Ok(Event {
        event_id: event_id.parse()?,
        task_id: task_id.parse()?,
        task_seq: row.try_get("task_seq")?,
        ts: row.try_get("ts")?,
        schema_version: row.try_get::<i64, _>("schema_version")? as u32,
        actor: parse_actor(&actor)?,
        payload: serde_json::from_str(&payload_json)?,
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        parent_event_id: parent_event_id.map(|s| s.parse()).transpose()?,
        idempotency_key: row.try_get("idempotency_key")?,
    })
}

fn parse_actor(s: &str) -> anyhow::Result<taskgate_types::ActorType> {
    use taskgate_types::ActorType::*;
    Ok(match s {
        "user" => User,
        "system" => System,
        "worker" => Worker,
        "tool" => Tool,
        "kernel" => Kernel,
        other => anyhow::bail!("unknown actor in storage: {other}"),
    })
}

fn actor_str(a: taskgate_types::ActorType) -> &'static str {
    use taskgate_types::ActorType::*;
    match a {
        User => "user",
        System => "system",
        Worker => "worker",
        Tool => "tool",
        Kernel => "kernel",
    }
}

async fn insert_event(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, event: &Event) -> StoreResult<()> {
    let payload_json = serde_json::to_string(&event.payload)
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
    let result = sqlx::query(
        r#"
        INSERT INTO events
            (event_id, task_id, task_seq, ts, schema_version, actor, payload,
             trace_id, span_id, parent_event_id, idempotency_key)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.event_id.to_string())
    .bind(event.task_id.to_string())
    .bind(event.task_seq)
    .bind(event.ts)
    .bind(event.schema_version as i64)
    .bind(actor_str(event.actor))
    .bind(payload_json)
    .bind(&event.trace_id)
    .bind(&event.span_id)
    .bind(event.parent_event_id.map(|id| id.to_string()))
    .bind(&event.idempotency_key)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            let msg = db_err.message();
            if msg.contains("idempotency_key") {
                Err(StoreError::IdempotencyConflict {
                    key: event.idempotency_key.clone().unwrap_or_default(),
                })
            } else {
                Err(StoreError::SequenceConflict {
                    task_id: event.task_id,
                    task_seq: event.task_seq,
                })
            }
        }
        Err(e) => Err(StoreError::Backend(e.into())),
    }
}

#[async_trait]
impl TaskEventStore for SqliteBackend {
    async fn commit_initial(&self, task: Task, events: Vec<Event>) -> StoreResult<IngressOutcome> {
        let idempotency_key = events
            .iter()
            .find_map(|e| e.idempotency_key.clone())
            .expect("commit_initial requires an idempotency_key on one of the initial events");

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, created_at, updated_at, status, title, thread_id, scope_id,
                 channel, sender_id, risk_level, latest_event_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.task_id.to_string())
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.status.to_string())
        .bind(&task.title)
        .bind(&task.thread_id)
        .bind(&task.scope_id)
        .bind(&task.requester.channel)
        .bind(&task.requester.sender_id)
        .bind(risk_str(task.risk_level))
        .bind(task.pointers.latest_event_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        for event in &events {
            insert_event(&mut tx, event).await?;
        }

        match tx.commit().await {
            Ok(()) => Ok(IngressOutcome {
                task_id: task.task_id,
                created: true,
            }),
            Err(e) => {
                // A concurrent duplicate may have raced the idempotency
                // uniqueness check; re-read rather than surfacing an error.
                if let Some(existing) = self.find_by_idempotency(&idempotency_key).await? {
                    return Ok(IngressOutcome {
                        task_id: existing,
                        created: false,
                    });
                }
                Err(StoreError::Backend(e.into()))
            }
        }
    }

    async fn commit_transition(
        &self,
        event: Event,
        new_status: TaskStatus,
        expected_status: Option<TaskStatus>,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let row = sqlx::query("SELECT status FROM tasks WHERE task_id = ?")
            .bind(event.task_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?
            .ok_or(StoreError::NotFound)?;
        let current: TaskStatus =
            parse_status(&row.try_get::<String, _>("status").unwrap())
                .map_err(StoreError::Backend)?;

        if let Some(expected) = expected_status {
            if current != expected {
                return Err(StoreError::StatusConflict {
                    task_id: event.task_id,
                    expected,
                    actual: current,
                });
            }
        }
        if !current.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                task_id: event.task_id,
                from: current,
                to: new_status,
            });
        }

        insert_event(&mut tx, &event).await?;

        sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ?, latest_event_id = ? WHERE task_id = ?",
        )
        .bind(new_status.to_string())
        .bind(event.ts)
        .bind(event.event_id.to_string())
        .bind(event.task_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))
    }

    async fn commit_progress(&self, event: Event) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        insert_event(&mut tx, &event).await?;

        let result = sqlx::query(
            "UPDATE tasks SET updated_at = ?, latest_event_id = ? WHERE task_id = ?",
        )
        .bind(event.ts)
        .bind(event.event_id.to_string())
        .bind(event.task_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))
    }

    async fn next_task_seq(&self, task_id: TaskId) -> StoreResult<i64> {
        let row = sqlx::query("SELECT MAX(task_seq) as max_seq FROM events WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        let max_seq: Option<i64> = row.try_get("max_seq").map_err(|e| StoreError::Backend(e.into()))?;
        Ok(max_seq.unwrap_or(0) + 1)
    }

    async fn events_for(&self, task_id: TaskId) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE task_id = ? ORDER BY task_seq ASC")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter()
            .map(|r| row_to_event(r).map_err(StoreError::Backend))
            .collect()
    }

    async fn events_after(
        &self,
        task_id: TaskId,
        after_event_id: EventId,
    ) -> StoreResult<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT * FROM events WHERE task_id = ? AND event_id > ? ORDER BY task_seq ASC",
        )
        .bind(task_id.to_string())
        .bind(after_event_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter()
            .map(|r| row_to_event(r).map_err(StoreError::Backend))
            .collect()
    }

    async fn find_by_idempotency(&self, key: &str) -> StoreResult<Option<TaskId>> {
        let row = sqlx::query("SELECT task_id FROM events WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(|r| {
            r.try_get::<String, _>("task_id")
                .map_err(|e| StoreError::Backend(e.into()))
                .and_then(|s| s.parse().map_err(|e: uuid::Error| StoreError::Backend(e.into())))
        })
        .transpose()
    }

    async fn get_task(&self, task_id: TaskId) -> StoreResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(|r| row_to_task(&r).map_err(StoreError::Backend)).transpose()
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY created_at DESC")
                    .bind(s.to_string())
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM tasks ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter()
            .map(|r| row_to_task(r).map_err(StoreError::Backend))
            .collect()
    }

    async fn force_failed_without_event(&self, task_id: TaskId) -> StoreResult<()> {
        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE task_id = ?")
            .bind(TaskStatus::Failed.to_string())
            .bind(now_millis())
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for SqliteBackend {
    async fn put(
        &self,
        task_id: TaskId,
        name: &str,
        description: Option<&str>,
        mime: &str,
        content: &[u8],
    ) -> StoreResult<Artifact> {
        let artifact_id = ArtifactId::new();
        let size = content.len() as u64;
        let sha256 = hex::encode(Sha256::digest(content));

        let (storage_ref, part) = if size >= self.inline_threshold {
            let dir = self.artifacts_root.join(task_id.to_string());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
            let path = dir.join(artifact_id.to_string());
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| StoreError::Backend(e.into()))?;
            let uri = path.to_string_lossy().into_owned();
            (
                Some(uri.clone()),
                ArtifactPart {
                    part_type: PartType::Text,
                    mime: mime.to_string(),
                    content: None,
                    uri: Some(uri),
                },
            )
        } else {
            let text = String::from_utf8_lossy(content).into_owned();
            (
                None,
                ArtifactPart {
                    part_type: PartType::Text,
                    mime: mime.to_string(),
                    content: Some(text),
                    uri: None,
                },
            )
        };

        let artifact = Artifact {
            artifact_id,
            task_id,
            ts: now_millis(),
            name: name.to_string(),
            description: description.map(|s| s.to_string()),
            parts: vec![part],
            storage_ref,
            size,
            sha256,
            version: 1,
        };

        let parts_json =
            serde_json::to_string(&artifact.parts).map_err(|e| StoreError::Backend(e.into()))?;
        sqlx::query(
            r#"
            INSERT INTO artifacts
                (artifact_id, task_id, ts, name, description, parts, storage_ref, size, sha256, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(artifact.artifact_id.to_string())
        .bind(artifact.task_id.to_string())
        .bind(artifact.ts)
        .bind(&artifact.name)
        .bind(&artifact.description)
        .bind(parts_json)
        .bind(&artifact.storage_ref)
        .bind(artifact.size as i64)
        .bind(&artifact.sha256)
        .bind(artifact.version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(artifact)
    }

    async fn get(&self, artifact_id: ArtifactId) -> StoreResult<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE artifact_id = ?")
            .bind(artifact_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        row.map(|r| row_to_artifact(&r).map_err(StoreError::Backend)).transpose()
    }

    async fn get_content(&self, artifact_id: ArtifactId) -> StoreResult<Option<Vec<u8>>> {
        let artifact = match self.get(artifact_id).await? {
            Some(a) => a,
            None => return Ok(None),
        };
        if let Some(path) = &artifact.storage_ref {
            let bytes = tokio::fs::read(path).await.map_err(|e| StoreError::Backend(e.into()))?;
            return Ok(Some(bytes));
        }
        Ok(artifact
            .parts
            .first()
            .and_then(|p| p.content.as_ref())
            .map(|c| c.as_bytes().to_vec()))
    }

    async fn list_for_task(&self, task_id: TaskId) -> StoreResult<Vec<Artifact>> {
        let rows = sqlx::query("SELECT * FROM artifacts WHERE task_id = ? ORDER BY ts ASC")
            .bind(task_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        rows.iter()
            .map(|r| row_to_artifact(r).map_err(StoreError::Backend))
            .collect()
    }
}

fn row_to_artifact(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Artifact> {
    let artifact_id: String = row.try_get("artifact_id")?;
    let task_id: String = row.try_get("task_id")?;
    let parts_json: String = row.try_get("parts")?;
    Ok(Artifact {
        artifact_id: artifact_id.parse()?,
        task_id: task_id.parse()?,
        ts: row.try_get("ts")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parts: serde_json::from_str(&parts_json)?,
        storage_ref: row.try_get("storage_ref")?,
        size: row.try_get::<i64, _>("size")? as u64,
        sha256: row.try_get("sha256")?,
        version: row.try_get::<i64, _>("version")? as u32,
    })
}

#[async_trait]
impl ProjectionRebuilder for SqliteBackend {
    async fn rebuild(&self) -> StoreResult<usize> {
        tracing::info!("projection_rebuild_started");

        let rows = sqlx::query("SELECT * FROM events ORDER BY task_id, task_seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        let events: Vec<Event> = rows
            .iter()
            .map(|r| row_to_event(r).map_err(StoreError::Backend))
            .collect::<StoreResult<_>>()?;

        // Preserve the requester/thread/scope metadata already on each row;
        // only status/updated_at/latest_event_id are derived from replay.
        let existing_rows = sqlx::query("SELECT * FROM tasks")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        let mut tasks: std::collections::BTreeMap<TaskId, Task> = existing_rows
            .iter()
            .map(|r| row_to_task(r).map_err(StoreError::Backend).map(|t| (t.task_id, t)))
            .collect::<StoreResult<_>>()?;

        for event in &events {
            let Some(task) = tasks.get_mut(&event.task_id) else {
                continue;
            };
            match &event.payload {
                EventPayload::TaskCreated(p) => {
                    task.created_at = event.ts;
                    task.updated_at = event.ts;
                    task.status = TaskStatus::Created;
                    task.title = p.title.clone();
                    task.thread_id = p.thread_id.clone();
                    task.scope_id = p.scope_id.clone();
                    task.requester.channel = p.channel.clone();
                    task.requester.sender_id = p.sender_id.clone();
                    task.pointers.latest_event_id = event.event_id;
                }
                EventPayload::StateTransition(p) => {
                    task.status = p.to_status;
                    task.updated_at = event.ts;
                    task.pointers.latest_event_id = event.event_id;
                }
                _ => {
                    task.updated_at = event.ts;
                    task.pointers.latest_event_id = event.event_id;
                }
            }
        }

        // `PRAGMA foreign_keys` is a no-op once a transaction is already
        // open, so it must be set on the connection before `begin()` and
        // restored on the same connection before it returns to the pool.
        let mut conn = self.pool.acquire().await.map_err(|e| StoreError::Backend(e.into()))?;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        let mut tx = conn.begin().await.map_err(|e| StoreError::Backend(e.into()))?;
        sqlx::query("DELETE FROM tasks")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        for task in tasks.values() {
            sqlx::query(
                r#"
                INSERT INTO tasks
                    (task_id, created_at, updated_at, status, title, thread_id, scope_id,
                     channel, sender_id, risk_level, latest_event_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(task.task_id.to_string())
            .bind(task.created_at)
            .bind(task.updated_at)
            .bind(task.status.to_string())
            .bind(&task.title)
            .bind(&task.thread_id)
            .bind(&task.scope_id)
            .bind(&task.requester.channel)
            .bind(&task.requester.sender_id)
            .bind(risk_str(task.risk_level))
            .bind(task.pointers.latest_event_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        }
        tx.commit().await.map_err(|e| StoreError::Backend(e.into()))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;

        tracing::info!(tasks = tasks.len(), "projection_rebuild_completed");
        Ok(tasks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskgate_types::{
        ActorType, EventId, RiskLevel, Requester, StateTransitionPayload, TaskCreatedPayload,
        TaskId, TaskPointers, UserMessagePayload,
    };

    fn new_task(title: &str) -> (Task, Vec<Event>) {
        let task_id = TaskId::new();
        let created_event = Event {
            event_id: EventId::new(),
            task_id,
            task_seq: 1,
            ts: 1,
            schema_version: 1,
            actor: ActorType::User,
            payload: EventPayload::TaskCreated(TaskCreatedPayload {
                title: title.to_string(),
                thread_id: "thread-1".into(),
                scope_id: None,
                channel: "web".into(),
                sender_id: "user-1".into(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: Some(format!("key-{title}")),
        };
        let message_event = Event {
            event_id: EventId::new(),
            task_id,
            task_seq: 2,
            ts: 2,
            schema_version: 1,
            actor: ActorType::User,
            payload: EventPayload::UserMessage(UserMessagePayload {
                text_preview: title.to_string(),
                text_length: title.len(),
                attachment_count: 0,
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: None,
        };
        let task = Task {
            task_id,
            created_at: 1,
            updated_at: 2,
            status: TaskStatus::Created,
            title: title.to_string(),
            thread_id: "thread-1".into(),
            scope_id: None,
            requester: Requester {
                channel: "web".into(),
                sender_id: "user-1".into(),
            },
            risk_level: RiskLevel::Low,
            pointers: TaskPointers {
                latest_event_id: message_event.event_id,
            },
        };
        (task, vec![created_event, message_event])
    }

    async fn backend() -> SqliteBackend {
        let dir = tempfile::tempdir().unwrap();
        SqliteBackend::in_memory(dir.path().join("artifacts")).await.unwrap()
    }

    #[tokio::test]
    async fn commit_initial_then_duplicate_idempotency_key_returns_existing_task() {
        let store = backend().await;
        let (task, events) = new_task("hello");
        let key = events[0].idempotency_key.clone().unwrap();

        let outcome = store.commit_initial(task.clone(), events).await.unwrap();
        assert!(outcome.created);

        let (mut task2, mut events2) = new_task("hello");
        task2.task_id = TaskId::new();
        for e in &mut events2 {
            e.task_id = task2.task_id;
        }
        events2[0].idempotency_key = Some(key);

        let outcome2 = store.commit_initial(task2, events2).await.unwrap();
        assert!(!outcome2.created);
        assert_eq!(outcome2.task_id, outcome.task_id);
    }

    #[tokio::test]
    async fn transitions_enforce_expected_status() {
        let store = backend().await;
        let (task, events) = new_task("hi");
        let task_id = task.task_id;
        store.commit_initial(task, events).await.unwrap();

        let seq = store.next_task_seq(task_id).await.unwrap();
        assert_eq!(seq, 3);

        let transition = Event {
            event_id: EventId::new(),
            task_id,
            task_seq: seq,
            ts: 3,
            schema_version: 1,
            actor: ActorType::System,
            payload: EventPayload::StateTransition(StateTransitionPayload {
                from_status: TaskStatus::Created,
                to_status: TaskStatus::Running,
                reason: String::new(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: None,
        };
        store
            .commit_transition(transition, TaskStatus::Running, Some(TaskStatus::Created))
            .await
            .unwrap();

        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);

        // Stale expectation now fails.
        let seq2 = store.next_task_seq(task_id).await.unwrap();
        let bad_transition = Event {
            event_id: EventId::new(),
            task_id,
            task_seq: seq2,
            ts: 4,
            schema_version: 1,
            actor: ActorType::System,
            payload: EventPayload::StateTransition(StateTransitionPayload {
                from_status: TaskStatus::Created,
                to_status: TaskStatus::Succeeded,
                reason: String::new(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: None,
        };
        let err = store
            .commit_transition(bad_transition, TaskStatus::Succeeded, Some(TaskStatus::Created))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { .. }));
    }

    #[tokio::test]
    async fn sequence_conflict_on_duplicate_task_seq() {
        let store = backend().await;
        let (task, events) = new_task("hi");
        let task_id = task.task_id;
        store.commit_initial(task, events).await.unwrap();

        let dup = Event {
            event_id: EventId::new(),
            task_id,
            task_seq: 2,
            ts: 5,
            schema_version: 1,
            actor: ActorType::System,
            payload: EventPayload::StateTransition(StateTransitionPayload {
                from_status: TaskStatus::Created,
                to_status: TaskStatus::Running,
                reason: String::new(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: None,
        };
        let err = store
            .commit_transition(dup, TaskStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { .. }));
    }

    #[tokio::test]
    async fn artifact_inline_vs_spill_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteBackend::in_memory(dir.path().join("artifacts"))
            .await
            .unwrap()
            .with_inline_threshold(4096);
        let (task, events) = new_task("artifact-owner");
        let task_id = task.task_id;
        store.commit_initial(task, events).await.unwrap();

        let small = vec![b'a'; 4095];
        let artifact = store.put(task_id, "llm-response", None, "text/plain", &small).await.unwrap();
        assert!(artifact.storage_ref.is_none());
        assert_eq!(artifact.parts[0].content.as_deref(), Some(std::str::from_utf8(&small).unwrap()));

        let big = vec![b'b'; 4096];
        let artifact2 = store.put(task_id, "llm-response", None, "text/plain", &big).await.unwrap();
        assert!(artifact2.storage_ref.is_some());
        let content = store.get_content(artifact2.artifact_id).await.unwrap().unwrap();
        assert_eq!(content, big);
    }

    #[tokio::test]
    async fn rebuild_preserves_status_and_latest_event_id() {
        let store = backend().await;
        let (task, events) = new_task("to-rebuild");
        let task_id = task.task_id;
        store.commit_initial(task, events).await.unwrap();

        let seq = store.next_task_seq(task_id).await.unwrap();
        let transition = Event {
            event_id: EventId::new(),
            task_id,
            task_seq: seq,
            ts: 10,
            schema_version: 1,
            actor: ActorType::System,
            payload: EventPayload::StateTransition(StateTransitionPayload {
                from_status: TaskStatus::Created,
                to_status: TaskStatus::Running,
                reason: String::new(),
            }),
            trace_id: None,
            span_id: None,
            parent_event_id: None,
            idempotency_key: None,
        };
        store
            .commit_transition(transition, TaskStatus::Running, Some(TaskStatus::Created))
            .await
            .unwrap();

        let before = store.get_task(task_id).await.unwrap().unwrap();
        let rebuilt_count = store.rebuild().await.unwrap();
        assert_eq!(rebuilt_count, 1);
        let after = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }
}
