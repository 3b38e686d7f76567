//! Core data models used throughout doc-courier.
//!
//! These types represent the tracked files, lifecycle statuses, and audit
//! entries that flow through the selection, upload, and processing pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle status of a tracked file.
///
/// The happy path is `Selected → Pending → Uploading → Uploaded →
/// Processing → Processed`. Failures branch to `UploadFailed` /
/// `ProcessFailed` and can be retried by re-entering the stage they
/// failed from. `Duplicate` and `Overwrite` branch off `Selected` when
/// the content hash matches a prior record for the same host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Registered, not yet classified or queued.
    Selected,
    /// Classified as new (or requeued), waiting for an upload slot.
    Pending,
    /// Claimed by an upload worker; transfer in progress.
    Uploading,
    /// Upload accepted by the ingestion service.
    Uploaded,
    /// Upload attempt failed; eligible for resubmission.
    UploadFailed,
    /// Included in an in-flight processing batch.
    Processing,
    /// Fully ingested by the processing service.
    Processed,
    /// Processing reported failure for this record.
    ProcessFailed,
    /// Same content exists for this host but never finished processing.
    /// Excluded from upload batches unless explicitly forced.
    Duplicate,
    /// Same content was already fully processed `n` times for this host.
    /// Still eligible for upload (intentional re-ingestion).
    Overwrite(u32),
}

impl FileStatus {
    /// Stable string stored in the `status` column.
    ///
    /// The overwrite payload lives in the `overwrite_count` column, never
    /// inside the status string.
    pub fn as_db(&self) -> &'static str {
        match self {
            FileStatus::Selected => "selected",
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Uploaded => "uploaded",
            FileStatus::UploadFailed => "upload_failed",
            FileStatus::Processing => "processing",
            FileStatus::Processed => "processed",
            FileStatus::ProcessFailed => "process_failed",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Overwrite(_) => "overwrite",
        }
    }

    /// Parse a `status` column value back into a variant. The overwrite
    /// count is re-attached from its own column.
    pub fn from_db(status: &str, overwrite_count: u32) -> Option<FileStatus> {
        match status {
            "selected" => Some(FileStatus::Selected),
            "pending" => Some(FileStatus::Pending),
            "uploading" => Some(FileStatus::Uploading),
            "uploaded" => Some(FileStatus::Uploaded),
            "upload_failed" => Some(FileStatus::UploadFailed),
            "processing" => Some(FileStatus::Processing),
            "processed" => Some(FileStatus::Processed),
            "process_failed" => Some(FileStatus::ProcessFailed),
            "duplicate" => Some(FileStatus::Duplicate),
            "overwrite" => Some(FileStatus::Overwrite(overwrite_count)),
            _ => None,
        }
    }

    /// Coarse projection exposed to external consumers:
    /// `pending`, `uploaded`, `processed`, or `error`. Duplicate and
    /// overwrite classifications are annotations, not external statuses.
    pub fn external(&self) -> &'static str {
        match self {
            FileStatus::Selected
            | FileStatus::Pending
            | FileStatus::Uploading
            | FileStatus::Duplicate
            | FileStatus::Overwrite(_) => "pending",
            FileStatus::Uploaded | FileStatus::Processing => "uploaded",
            FileStatus::Processed => "processed",
            FileStatus::UploadFailed | FileStatus::ProcessFailed => "error",
        }
    }

    /// Whether an upload worker may claim a record in this status.
    pub fn upload_eligible(&self) -> bool {
        matches!(self, FileStatus::Pending | FileStatus::UploadFailed)
    }

    /// Whether this status ends the record's lifecycle unless the
    /// operator intervenes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Processed
                | FileStatus::Duplicate
                | FileStatus::UploadFailed
                | FileStatus::ProcessFailed
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// One tracked file per selection event (not per physical file on disk).
///
/// Identity is the content hash scoped by `host`: the same bytes uploaded
/// to two different targets are two independent records.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size_bytes: i64,
    /// Absolute path the bytes are read from at upload time.
    pub original_path: String,
    /// Path relative to the scan root, when selected via a directory scan.
    pub relative_path: Option<String>,
    /// Source file modification time.
    pub last_modified: DateTime<Utc>,
    pub selected_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Named backend target this record's upload is scoped to.
    pub host: String,
    pub status: FileStatus,
    pub error_message: Option<String>,
    /// Operator identity captured at selection time.
    pub user_name: Option<String>,
    pub upload_duration_ms: Option<i64>,
    pub process_duration_ms: Option<i64>,
    pub file_type: Option<String>,
    pub mime_type: Option<String>,
    /// SHA-256 of the file bytes, lowercase hex.
    pub checksum: String,
    /// Failed attempts of the current stage. Reset to 0 on a successful
    /// transition out of a failing state.
    pub retry_count: u32,
    /// Prior completed ingestions of this content at classification time.
    pub overwrite_count: u32,
    /// Most recent prior `processed_at` when classified as an overwrite.
    pub last_duplicate_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Short human label used in log entries and progress lines.
    pub fn label(&self) -> String {
        format!("{} [{}]", self.name, &self.id[..8.min(self.id.len())])
    }
}

/// Candidate fields for registering a new record. The catalog assigns
/// the id, timestamps, and initial `Selected` status.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub size_bytes: i64,
    pub original_path: String,
    pub relative_path: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub host: String,
    pub checksum: String,
    pub file_type: Option<String>,
    pub mime_type: Option<String>,
    pub user_name: Option<String>,
}

/// Severity of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_db(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn from_db(s: &str) -> LogLevel {
        match s {
            "success" => LogLevel::Success,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Append-only audit entry. `file_id` is a weak reference: deleting the
/// record nulls it out, the entry itself survives.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub file_id: Option<String>,
}
