//! # OffKit Queue
//!
//! Durable FIFO queue for state-changing submissions made while offline or
//! failing. Items survive process restarts and are removed only on
//! confirmed delivery; a failed delivery increments the attempt count and
//! leaves the item queued for the next sync trigger.
//!
//! State machine per item: `pending → in-flight → {delivered | pending}`.
//! The queue itself only stores `pending`; in-flight is a property of the
//! running flush pass, and `delivered` items are deleted.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use offkit_common::{OffKitError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

/// Database schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// A pending state-changing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    /// Unique id (caller-supplied or generated).
    pub id: String,

    /// Target resource type (e.g. `job`).
    pub kind: String,

    /// Serialized payload to deliver.
    pub payload: JsonValue,

    /// Creation timestamp (ms since epoch).
    pub created_at: i64,

    /// Delivery attempts so far.
    pub attempts: u32,
}

impl QueuedSubmission {
    /// Create a submission with a generated id, stamped now.
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        let kind = kind.into();
        Self {
            id: generate_id(&kind),
            kind,
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }

    /// Create a submission with a caller-supplied id, stamped now.
    pub fn with_id(id: impl Into<String>, kind: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }
}

/// Result of an enqueue, distinguishing a fresh insert from an idempotency
/// hit on an already-queued id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Submission was queued.
    Created(String),
    /// A submission with this id was already queued.
    Duplicate(String),
}

impl EnqueueResult {
    /// Get the submission id regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => id,
        }
    }

    /// Returns true if this enqueue inserted a new item.
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// Sqlite-backed submission queue.
pub struct SubmissionQueue {
    conn: Connection,
}

impl SubmissionQueue {
    /// Open (or create) a queue at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Opening submission queue at {:?}", path.as_ref());
        let conn = Connection::open(path)
            .map_err(|e| OffKitError::queue(format!("Failed to open queue: {}", e)))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory queue. Used by tests and the smoke harness.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OffKitError::queue(format!("Failed to open queue: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Persist a submission. Enqueueing an id that is already queued is an
    /// idempotent no-op reported as `Duplicate`.
    pub fn enqueue(&self, submission: &QueuedSubmission) -> Result<EnqueueResult> {
        let payload = serde_json::to_string(&submission.payload)?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO submissions (id, kind, payload, created_at, attempts)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    submission.id,
                    submission.kind,
                    payload,
                    submission.created_at,
                    submission.attempts
                ],
            )
            .map_err(|e| OffKitError::queue(format!("Failed to enqueue: {}", e)))?;

        if inserted == 0 {
            debug!(id = %submission.id, "Submission already queued");
            return Ok(EnqueueResult::Duplicate(submission.id.clone()));
        }

        info!(id = %submission.id, kind = %submission.kind, "Queued submission");
        Ok(EnqueueResult::Created(submission.id.clone()))
    }

    /// All pending submissions, oldest first.
    pub fn pending(&self) -> Result<Vec<QueuedSubmission>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, kind, payload, created_at, attempts
                 FROM submissions ORDER BY created_at, seq",
            )
            .map_err(|e| OffKitError::queue(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })
            .map_err(|e| OffKitError::queue(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| OffKitError::queue(e.to_string()))?;

        rows.into_iter()
            .map(|(id, kind, payload, created_at, attempts)| {
                Ok(QueuedSubmission {
                    id,
                    kind,
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                    attempts,
                })
            })
            .collect()
    }

    /// Look up one pending submission.
    pub fn get(&self, id: &str) -> Result<Option<QueuedSubmission>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, kind, payload, created_at, attempts FROM submissions WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, u32>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| OffKitError::queue(e.to_string()))?;

        match row {
            Some((id, kind, payload, created_at, attempts)) => Ok(Some(QueuedSubmission {
                id,
                kind,
                payload: serde_json::from_str(&payload)?,
                created_at,
                attempts,
            })),
            None => Ok(None),
        }
    }

    /// Remove a delivered submission. Returns false if it was not queued.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM submissions WHERE id = ?", [id])
            .map_err(|e| OffKitError::queue(e.to_string()))?;
        Ok(removed > 0)
    }

    /// Record a failed delivery attempt. Returns the new attempt count.
    pub fn record_attempt(&self, id: &str) -> Result<u32> {
        self.conn
            .execute(
                "UPDATE submissions SET attempts = attempts + 1 WHERE id = ?",
                [id],
            )
            .map_err(|e| OffKitError::queue(e.to_string()))?;

        self.conn
            .query_row("SELECT attempts FROM submissions WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| OffKitError::queue(e.to_string()))?
            .ok_or_else(|| OffKitError::NotFound(format!("submission {}", id)))
    }

    /// Number of pending submissions.
    pub fn len(&self) -> Result<usize> {
        self.conn
            .query_row("SELECT COUNT(*) FROM submissions", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as usize)
            .map_err(|e| OffKitError::queue(e.to_string()))
    }

    /// Whether the queue has no pending submissions.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Initialize or migrate the queue schema. `seq` breaks FIFO ties between
/// submissions created in the same millisecond.
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS submissions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_submissions_created ON submissions(created_at);
        "#,
    )
    .map_err(|e| OffKitError::queue(format!("Failed to create schema: {}", e)))?;

    let version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| OffKitError::queue(e.to_string()))?
        .unwrap_or(0);

    if version < SCHEMA_VERSION {
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![SCHEMA_VERSION, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| OffKitError::queue(e.to_string()))?;
    }

    Ok(())
}

/// Generate a unique submission id.
fn generate_id(kind: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "{}-{:x}-{:04x}",
        kind,
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
