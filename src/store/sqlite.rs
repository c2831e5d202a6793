//! SQLite persistence for task documents
//!
//! Owned exclusively by the store actor; all access is single-threaded.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::domain::{Task, TaskPatch, TaskStatus};

use super::messages::{StatusCounts, StoreError, StoreResult};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id                    TEXT PRIMARY KEY,
    action                TEXT NOT NULL,
    parameters            TEXT NOT NULL,
    status                TEXT NOT NULL,
    result                TEXT,
    error                 TEXT,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL,
    queued_at             TEXT,
    processing_started_at TEXT,
    processed_by_worker   TEXT,
    processed_by_device   TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// The task table behind the store actor
pub(super) struct TaskDb {
    conn: Connection,
}

impl TaskDb {
    /// Open (or create) the database at the given path
    pub(super) fn open(path: &Path) -> StoreResult<Self> {
        debug!(path = %path.display(), "TaskDb::open: called");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn })
    }

    pub(super) fn create(&self, task: &Task) -> StoreResult<String> {
        debug!(task_id = %task.id, action = %task.action, "TaskDb::create: called");
        let result = self.conn.execute(
            "INSERT INTO tasks (id, action, parameters, status, result, error,
                                created_at, updated_at, queued_at, processing_started_at,
                                processed_by_worker, processed_by_device)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.id,
                task.action,
                task.parameters.to_string(),
                task.status.as_str(),
                task.result.as_ref().map(|v| v.to_string()),
                task.error,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
                task.queued_at.map(|t| t.to_rfc3339()),
                task.processing_started_at.map(|t| t.to_rfc3339()),
                task.processed_by_worker,
                task.processed_by_device,
            ],
        );

        match result {
            Ok(_) => Ok(task.id.clone()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate(task.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(super) fn get(&self, id: &str) -> StoreResult<Option<Task>> {
        debug!(%id, "TaskDb::get: called");
        let mut stmt = self.conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], task_from_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub(super) fn update(&self, id: &str, patch: &TaskPatch) -> StoreResult<()> {
        debug!(%id, status = ?patch.status, "TaskDb::update: called");
        let mut task = self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(&mut task);

        self.conn.execute(
            "UPDATE tasks SET status = ?2, result = ?3, error = ?4, updated_at = ?5,
                              queued_at = ?6, processing_started_at = ?7,
                              processed_by_worker = ?8, processed_by_device = ?9
             WHERE id = ?1",
            params![
                id,
                task.status.as_str(),
                task.result.as_ref().map(|v| v.to_string()),
                task.error,
                task.updated_at.to_rfc3339(),
                task.queued_at.map(|t| t.to_rfc3339()),
                task.processing_started_at.map(|t| t.to_rfc3339()),
                task.processed_by_worker,
                task.processed_by_device,
            ],
        )?;

        Ok(())
    }

    pub(super) fn list(&self, status_filter: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        debug!(?status_filter, "TaskDb::list: called");
        let mut tasks = Vec::new();

        match status_filter {
            Some(status) => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY created_at")?;
                let rows = stmt.query_map(params![status.as_str()], task_from_row)?;
                for row in rows {
                    tasks.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare("SELECT * FROM tasks ORDER BY created_at")?;
                let rows = stmt.query_map([], task_from_row)?;
                for row in rows {
                    tasks.push(row?);
                }
            }
        }

        Ok(tasks)
    }

    /// Conditional pending -> queued transition
    ///
    /// Returns false when the task was already claimed (or is in any other
    /// state), which is what makes duplicate change notifications harmless.
    pub(super) fn claim_pending(&self, id: &str) -> StoreResult<bool> {
        debug!(%id, "TaskDb::claim_pending: called");
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE tasks SET status = 'queued', queued_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id],
        )?;

        Ok(changed > 0)
    }

    pub(super) fn counts(&self) -> StoreResult<StatusCounts> {
        debug!("TaskDb::counts: called");
        let mut stmt = self.conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => counts.pending = count,
                "queued" => counts.queued = count,
                "processing" => counts.processing = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                "abandoned" => counts.abandoned = count,
                other => debug!(status = %other, "TaskDb::counts: unexpected status in table"),
            }
        }

        Ok(counts)
    }
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let parameters: String = row.get(2)?;
    let status: String = row.get(3)?;
    let result: Option<String> = row.get(4)?;

    Ok(Task {
        id: row.get(0)?,
        action: row.get(1)?,
        parameters: parse_json(2, &parameters)?,
        status: TaskStatus::parse(&status)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into()))?,
        result: result.map(|v| parse_json(4, &v)).transpose()?,
        error: row.get(5)?,
        created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        queued_at: row.get::<_, Option<String>>(8)?.map(|s| parse_ts(8, &s)).transpose()?,
        processing_started_at: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(9, &s)).transpose()?,
        processed_by_worker: row.get(10)?,
        processed_by_device: row.get(11)?,
    })
}

fn parse_json(idx: usize, s: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}
