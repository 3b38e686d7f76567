//! Durable file catalog.
//!
//! The catalog is the source of truth for record identity and history.
//! All mutation goes through its narrow contract: `register`, `update`,
//! `claim_for_upload`, and `clear`. Every update appends exactly one
//! audit entry summarizing the change, which is what lets the state
//! tracker guarantee one log line per transition.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::PipelineError;
use crate::models::{FileRecord, FileStatus, LogLevel, NewFile};

/// Partial update applied by [`FileCatalog::update`]. `None` fields are
/// left untouched; `error_message` uses a nested option so a success
/// transition can clear a stale message.
#[derive(Debug, Default, Clone)]
pub struct RecordPatch {
    pub status: Option<FileStatus>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub upload_duration_ms: Option<i64>,
    pub process_duration_ms: Option<i64>,
    pub overwrite_count: Option<u32>,
    pub last_duplicate_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct FileCatalog {
    pool: SqlitePool,
    audit: AuditLog,
}

impl FileCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        let audit = AuditLog::new(pool.clone());
        Self { pool, audit }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Allocate an id and store the candidate with status `selected`.
    pub async fn register(&self, candidate: NewFile) -> Result<FileRecord, PipelineError> {
        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            name: candidate.name,
            size_bytes: candidate.size_bytes,
            original_path: candidate.original_path,
            relative_path: candidate.relative_path,
            last_modified: candidate.last_modified,
            selected_at: now,
            uploaded_at: None,
            processed_at: None,
            host: candidate.host,
            status: FileStatus::Selected,
            error_message: None,
            user_name: candidate.user_name,
            upload_duration_ms: None,
            process_duration_ms: None,
            file_type: candidate.file_type,
            mime_type: candidate.mime_type,
            checksum: candidate.checksum,
            retry_count: 0,
            overwrite_count: 0,
            last_duplicate_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO files (id, name, size_bytes, original_path, relative_path, last_modified,
                selected_at, uploaded_at, processed_at, host, status, error_message, user_name,
                computer_name, user_agent,
                upload_duration_ms, process_duration_ms, file_type, mime_type, checksum,
                retry_count, overwrite_count, last_duplicate_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.size_bytes)
        .bind(&record.original_path)
        .bind(&record.relative_path)
        .bind(record.last_modified.timestamp_millis())
        .bind(record.selected_at.timestamp_millis())
        .bind(record.uploaded_at.map(|t| t.timestamp_millis()))
        .bind(record.processed_at.map(|t| t.timestamp_millis()))
        .bind(&record.host)
        .bind(record.status.as_db())
        .bind(&record.error_message)
        .bind(&record.user_name)
        .bind(std::env::var("HOSTNAME").ok())
        .bind(concat!("doc-courier/", env!("CARGO_PKG_VERSION")))
        .bind(record.upload_duration_ms)
        .bind(record.process_duration_ms)
        .bind(&record.file_type)
        .bind(&record.mime_type)
        .bind(&record.checksum)
        .bind(record.retry_count as i64)
        .bind(record.overwrite_count as i64)
        .bind(record.last_duplicate_at.map(|t| t.timestamp_millis()))
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.audit
            .append(
                LogLevel::Info,
                &format!("selected {} ({} bytes) for host {}", record.name, record.size_bytes, record.host),
                Some(&record.id),
            )
            .await?;

        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<FileRecord, PipelineError> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("record {}", id)))?;
        row_to_record(&row)
    }

    /// All prior records with matching hash and host, oldest first.
    /// This ordering is what the duplicate detector's tie-break relies on.
    pub async fn find(&self, checksum: &str, host: &str) -> Result<Vec<FileRecord>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE checksum = ? AND host = ? \
             ORDER BY selected_at ASC, created_at ASC",
        )
        .bind(checksum)
        .bind(host)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Apply a partial update and append one audit entry summarizing it.
    /// Fails with `NotFound` for unknown ids.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> Result<FileRecord, PipelineError> {
        let before = self.get(id).await?;
        let mut record = before.clone();

        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(t) = patch.uploaded_at {
            record.uploaded_at = Some(t);
        }
        if let Some(t) = patch.processed_at {
            record.processed_at = Some(t);
        }
        if let Some(msg) = patch.error_message {
            record.error_message = msg;
        }
        if let Some(n) = patch.retry_count {
            record.retry_count = n;
        }
        if let Some(d) = patch.upload_duration_ms {
            record.upload_duration_ms = Some(d);
        }
        if let Some(d) = patch.process_duration_ms {
            record.process_duration_ms = Some(d);
        }
        if let Some(n) = patch.overwrite_count {
            record.overwrite_count = n;
        }
        if let Some(t) = patch.last_duplicate_at {
            record.last_duplicate_at = Some(t);
        }
        record.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE files SET status = ?, uploaded_at = ?, processed_at = ?, error_message = ?,
                retry_count = ?, upload_duration_ms = ?, process_duration_ms = ?,
                overwrite_count = ?, last_duplicate_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.status.as_db())
        .bind(record.uploaded_at.map(|t| t.timestamp_millis()))
        .bind(record.processed_at.map(|t| t.timestamp_millis()))
        .bind(&record.error_message)
        .bind(record.retry_count as i64)
        .bind(record.upload_duration_ms)
        .bind(record.process_duration_ms)
        .bind(record.overwrite_count as i64)
        .bind(record.last_duplicate_at.map(|t| t.timestamp_millis()))
        .bind(record.updated_at.timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let (level, message) = summarize_change(&before, &record);
        self.audit.append(level, &message, Some(id)).await?;

        Ok(record)
    }

    /// Atomically claim a record for upload: `pending` or `upload_failed`
    /// moves to `uploading`, anything else is a precondition failure.
    /// The conditional UPDATE is the mutual-exclusion point: at most one
    /// worker wins the claim for a given id.
    pub async fn claim_for_upload(&self, id: &str) -> Result<FileRecord, PipelineError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "UPDATE files SET status = 'uploading', updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'upload_failed')",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?;
            return Err(PipelineError::Precondition(format!(
                "record {} is '{}', not eligible for upload",
                current.label(),
                current.status
            )));
        }

        let record = self.get(id).await?;
        self.audit
            .append(
                LogLevel::Info,
                &format!("{}: claimed for upload", record.label()),
                Some(id),
            )
            .await?;
        Ok(record)
    }

    /// List records, newest selection first, optionally filtered by host
    /// and internal status string.
    pub async fn list(
        &self,
        host: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<FileRecord>, PipelineError> {
        let mut query = String::from("SELECT * FROM files WHERE 1=1");
        if host.is_some() {
            query.push_str(" AND host = ?");
        }
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY selected_at DESC, created_at DESC");

        let mut q = sqlx::query(&query);
        if let Some(h) = host {
            q = q.bind(h);
        }
        if let Some(s) = status {
            q = q.bind(s);
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Records currently in the given status for a host, oldest first.
    pub async fn list_in_status(
        &self,
        host: &str,
        status: &FileStatus,
    ) -> Result<Vec<FileRecord>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE host = ? AND status = ? \
             ORDER BY selected_at ASC, created_at ASC",
        )
        .bind(host)
        .bind(status.as_db())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Delete all records, optionally scoped to one host. Audit entries
    /// survive with their file references nulled.
    pub async fn clear(&self, host: Option<&str>) -> Result<u64, PipelineError> {
        let result = match host {
            Some(h) => {
                sqlx::query("DELETE FROM files WHERE host = ?")
                    .bind(h)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM files").execute(&self.pool).await?,
        };

        let deleted = result.rows_affected();
        self.audit
            .append(
                LogLevel::Warning,
                &format!(
                    "cleared {} record(s){}",
                    deleted,
                    host.map(|h| format!(" for host {}", h)).unwrap_or_default()
                ),
                None,
            )
            .await?;
        Ok(deleted)
    }

    /// Open an operation stats row for an upload batch or processing
    /// trigger. Returns the op id for [`FileCatalog::op_finish`].
    pub async fn op_start(
        &self,
        kind: &str,
        host: &str,
        file_count: usize,
        total_bytes: i64,
        user_name: &str,
    ) -> Result<String, PipelineError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO ops (id, kind, host, started_at, file_count, total_bytes, user_name) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind)
        .bind(host)
        .bind(Utc::now().timestamp_millis())
        .bind(file_count as i64)
        .bind(total_bytes)
        .bind(user_name)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Delete operation stats rows, optionally scoped to one host.
    pub async fn clear_ops(&self, host: Option<&str>) -> Result<u64, PipelineError> {
        let result = match host {
            Some(h) => {
                sqlx::query("DELETE FROM ops WHERE host = ?")
                    .bind(h)
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM ops").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    pub async fn op_finish(
        &self,
        op_id: &str,
        success_count: usize,
        error_count: usize,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE ops SET finished_at = ?, duration_ms = ? - started_at, \
             success_count = ?, error_count = ?, error_message = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(success_count as i64)
        .bind(error_count as i64)
        .bind(error_message)
        .bind(op_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// One-line audit summary for an update, with severity keyed off the
/// resulting status.
fn summarize_change(before: &FileRecord, after: &FileRecord) -> (LogLevel, String) {
    let label = after.label();

    if before.status != after.status {
        let level = match after.status {
            FileStatus::UploadFailed | FileStatus::ProcessFailed => LogLevel::Error,
            FileStatus::Uploaded | FileStatus::Processed => LogLevel::Success,
            FileStatus::Duplicate => LogLevel::Warning,
            _ => LogLevel::Info,
        };

        let mut message = format!("{}: {} -> {}", label, before.status, after.status);
        match &after.status {
            FileStatus::UploadFailed | FileStatus::ProcessFailed => {
                if let Some(err) = &after.error_message {
                    message.push_str(&format!(" ({}, attempt {})", err, after.retry_count));
                }
            }
            FileStatus::Uploaded => {
                if let Some(d) = after.upload_duration_ms {
                    message.push_str(&format!(" ({} ms)", d));
                }
            }
            FileStatus::Processed => {
                if let Some(d) = after.process_duration_ms {
                    message.push_str(&format!(" ({} ms)", d));
                }
            }
            FileStatus::Overwrite(n) => {
                message.push_str(&format!(" (processed {}x before)", n));
            }
            _ => {}
        }
        (level, message)
    } else {
        (LogLevel::Info, format!("{}: record updated", label))
    }
}

fn row_to_record(row: &SqliteRow) -> Result<FileRecord, PipelineError> {
    let status_str: String = row.get("status");
    let overwrite_count: i64 = row.get("overwrite_count");
    let id: String = row.get("id");

    let status = FileStatus::from_db(&status_str, overwrite_count as u32).ok_or_else(|| {
        PipelineError::Validation(format!("unknown status '{}' on record {}", status_str, id))
    })?;

    Ok(FileRecord {
        id,
        name: row.get("name"),
        size_bytes: row.get("size_bytes"),
        original_path: row.get("original_path"),
        relative_path: row.get("relative_path"),
        last_modified: ts(row.get("last_modified")),
        selected_at: ts(row.get("selected_at")),
        uploaded_at: row.get::<Option<i64>, _>("uploaded_at").map(ts),
        processed_at: row.get::<Option<i64>, _>("processed_at").map(ts),
        host: row.get("host"),
        status,
        error_message: row.get("error_message"),
        user_name: row.get("user_name"),
        upload_duration_ms: row.get("upload_duration_ms"),
        process_duration_ms: row.get("process_duration_ms"),
        file_type: row.get("file_type"),
        mime_type: row.get("mime_type"),
        checksum: row.get("checksum"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        overwrite_count: overwrite_count as u32,
        last_duplicate_at: row.get::<Option<i64>, _>("last_duplicate_at").map(ts),
        created_at: ts(row.get("created_at")),
        updated_at: ts(row.get("updated_at")),
    })
}

fn ts(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
