//! Append-only audit log.
//!
//! Every state transition and every coordinator/trigger outcome lands
//! here as exactly one entry. Entries are never mutated or reordered,
//! and they outlive the records they reference: deleting a file nulls
//! the weak `file_id` reference and leaves the entry in place.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{LogEntry, LogLevel};

#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one entry. `file_id` may reference a record that is later
    /// deleted; the entry survives with the reference nulled.
    pub async fn append(
        &self,
        level: LogLevel,
        message: &str,
        file_id: Option<&str>,
    ) -> Result<LogEntry, PipelineError> {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            level,
            timestamp: Utc::now(),
            file_id: file_id.map(|s| s.to_string()),
        };

        sqlx::query(
            "INSERT INTO logs (id, message, level, timestamp, file_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.message)
        .bind(entry.level.as_db())
        .bind(entry.timestamp.timestamp_millis())
        .bind(&entry.file_id)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Most recent `n` entries, newest first. Ordered by insertion
    /// (rowid), not timestamp: back-to-back appends land within the
    /// same millisecond and must come back in append order.
    pub async fn recent(&self, n: i64) -> Result<Vec<LogEntry>, PipelineError> {
        let rows = sqlx::query(
            "SELECT id, message, level, timestamp, file_id \
             FROM logs ORDER BY rowid DESC LIMIT ?",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LogEntry {
                id: row.get("id"),
                message: row.get("message"),
                level: LogLevel::from_db(row.get("level")),
                timestamp: chrono::DateTime::from_timestamp_millis(row.get("timestamp"))
                    .unwrap_or_default(),
                file_id: row.get("file_id"),
            })
            .collect())
    }

    /// Delete all entries. Operator-initiated only.
    pub async fn clear(&self) -> Result<u64, PipelineError> {
        let result = sqlx::query("DELETE FROM logs").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
