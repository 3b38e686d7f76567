//! Lifecycle state machine.
//!
//! Every status change goes through one of the methods here; each method
//! checks the record's current status against the closed transition
//! table and persists the change through the catalog, which appends the
//! one audit entry per transition. Requests that arrive in the wrong
//! state are rejected with a precondition error and a warning entry;
//! the record is never mutated.
//!
//! ```text
//! selected ──▶ pending ──▶ uploading ──▶ uploaded ──▶ processing ──▶ processed
//!    │                        │   ▲                      │    ▲
//!    ├──▶ duplicate           ▼   │                      ▼    │
//!    └──▶ overwrite(n)   upload_failed             process_failed
//! ```
//!
//! `duplicate` rejoins the machine only through a forced requeue;
//! `overwrite` requeues automatically when a batch is submitted.

use chrono::Utc;

use crate::catalog::{FileCatalog, RecordPatch};
use crate::detect::Classification;
use crate::error::PipelineError;
use crate::models::{FileRecord, FileStatus, LogLevel};

pub struct StateTracker {
    catalog: FileCatalog,
}

impl StateTracker {
    pub fn new(catalog: FileCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    /// Apply a classification to a freshly registered record.
    ///
    /// New content queues immediately; a duplicate parks until forced; an
    /// overwrite records how many completed ingestions precede it and
    /// stays eligible for upload.
    pub async fn apply_classification(
        &self,
        id: &str,
        classification: &Classification,
    ) -> Result<FileRecord, PipelineError> {
        self.guard(id, &[FileStatus::Selected], "classify").await?;

        let patch = match classification {
            Classification::New => RecordPatch {
                status: Some(FileStatus::Pending),
                ..Default::default()
            },
            Classification::Duplicate { .. } => RecordPatch {
                status: Some(FileStatus::Duplicate),
                last_duplicate_at: Some(Utc::now()),
                ..Default::default()
            },
            Classification::Overwrite {
                prior_processed,
                last_processed_at,
            } => RecordPatch {
                status: Some(FileStatus::Overwrite(*prior_processed)),
                overwrite_count: Some(*prior_processed),
                last_duplicate_at: *last_processed_at,
                ..Default::default()
            },
        };

        self.catalog.update(id, patch).await
    }

    /// Move an overwrite-classified record (or, when `force` is set, a
    /// duplicate) back into the upload queue.
    pub async fn requeue(&self, id: &str, force: bool) -> Result<FileRecord, PipelineError> {
        let record = self.catalog.get(id).await?;
        let allowed = match record.status {
            FileStatus::Overwrite(_) => true,
            FileStatus::Duplicate => force,
            _ => false,
        };
        if !allowed {
            return self.reject(&record, "requeue").await;
        }

        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::Pending),
                    ..Default::default()
                },
            )
            .await
    }

    /// Claim the record for upload: `pending` or `upload_failed` (a
    /// resubmission keeps its retry count) moves to `uploading`. The
    /// claim is atomic; a concurrent worker loses with a precondition
    /// error.
    pub async fn begin_upload(&self, id: &str) -> Result<FileRecord, PipelineError> {
        match self.catalog.claim_for_upload(id).await {
            Ok(record) => Ok(record),
            Err(PipelineError::Precondition(msg)) => {
                self.catalog
                    .audit()
                    .append(LogLevel::Warning, &msg, Some(id))
                    .await?;
                Err(PipelineError::Precondition(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Upload accepted: stamp `uploaded_at` and the measured duration,
    /// reset the retry count, clear any stale error.
    pub async fn finish_upload(
        &self,
        id: &str,
        duration_ms: i64,
    ) -> Result<FileRecord, PipelineError> {
        self.guard(id, &[FileStatus::Uploading], "finish upload")
            .await?;
        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::Uploaded),
                    uploaded_at: Some(Utc::now()),
                    upload_duration_ms: Some(duration_ms),
                    retry_count: Some(0),
                    error_message: Some(None),
                    ..Default::default()
                },
            )
            .await
    }

    /// Upload failed: record the error and count the attempt.
    pub async fn fail_upload(&self, id: &str, error: &str) -> Result<FileRecord, PipelineError> {
        let record = self
            .guard(id, &[FileStatus::Uploading], "fail upload")
            .await?;
        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::UploadFailed),
                    error_message: Some(Some(error.to_string())),
                    retry_count: Some(record.retry_count + 1),
                    ..Default::default()
                },
            )
            .await
    }

    /// Include the record in a processing batch. A `process_failed`
    /// record re-enters here on retry, keeping its count.
    pub async fn begin_processing(&self, id: &str) -> Result<FileRecord, PipelineError> {
        self.guard(
            id,
            &[FileStatus::Uploaded, FileStatus::ProcessFailed],
            "begin processing",
        )
        .await?;
        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::Processing),
                    ..Default::default()
                },
            )
            .await
    }

    pub async fn finish_processing(
        &self,
        id: &str,
        duration_ms: i64,
    ) -> Result<FileRecord, PipelineError> {
        self.guard(id, &[FileStatus::Processing], "finish processing")
            .await?;
        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::Processed),
                    processed_at: Some(Utc::now()),
                    process_duration_ms: Some(duration_ms),
                    retry_count: Some(0),
                    error_message: Some(None),
                    ..Default::default()
                },
            )
            .await
    }

    /// The boundary reported failure for this batch's content.
    pub async fn fail_processing(
        &self,
        id: &str,
        error: &str,
    ) -> Result<FileRecord, PipelineError> {
        let record = self
            .guard(id, &[FileStatus::Processing], "fail processing")
            .await?;
        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::ProcessFailed),
                    error_message: Some(Some(error.to_string())),
                    retry_count: Some(record.retry_count + 1),
                    ..Default::default()
                },
            )
            .await
    }

    /// The trigger never reached the boundary (transport failure): the
    /// record falls back to `uploaded` so a later trigger picks it up
    /// again. The attempt still counts.
    pub async fn revert_processing(
        &self,
        id: &str,
        error: &str,
    ) -> Result<FileRecord, PipelineError> {
        let record = self
            .guard(id, &[FileStatus::Processing], "revert processing")
            .await?;
        self.catalog
            .update(
                id,
                RecordPatch {
                    status: Some(FileStatus::Uploaded),
                    error_message: Some(Some(error.to_string())),
                    retry_count: Some(record.retry_count + 1),
                    ..Default::default()
                },
            )
            .await
    }

    async fn guard(
        &self,
        id: &str,
        allowed: &[FileStatus],
        operation: &str,
    ) -> Result<FileRecord, PipelineError> {
        let record = self.catalog.get(id).await?;
        let ok = allowed.iter().any(|status| match (status, &record.status) {
            (FileStatus::Overwrite(_), FileStatus::Overwrite(_)) => true,
            (a, b) => a == b,
        });
        if ok {
            Ok(record)
        } else {
            self.reject(&record, operation).await
        }
    }

    async fn reject(
        &self,
        record: &FileRecord,
        operation: &str,
    ) -> Result<FileRecord, PipelineError> {
        let msg = format!(
            "cannot {} {}: record is '{}'",
            operation,
            record.label(),
            record.status
        );
        self.catalog
            .audit()
            .append(LogLevel::Warning, &msg, Some(&record.id))
            .await?;
        Err(PipelineError::Precondition(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::models::NewFile;

    async fn setup() -> (tempfile::TempDir, StateTracker) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("courier.sqlite"))
            .await
            .unwrap();
        migrate::apply_schema(&pool).await.unwrap();
        (tmp, StateTracker::new(FileCatalog::new(pool)))
    }

    async fn register(tracker: &StateTracker, name: &str, checksum: &str) -> FileRecord {
        tracker
            .catalog()
            .register(NewFile {
                name: name.to_string(),
                size_bytes: 10,
                original_path: format!("/docs/{}", name),
                relative_path: None,
                last_modified: Utc::now(),
                host: "local".to_string(),
                checksum: checksum.to_string(),
                file_type: Some(".txt".to_string()),
                mime_type: None,
                user_name: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_passes_every_stage() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;

        let record = tracker
            .apply_classification(&record.id, &Classification::New)
            .await
            .unwrap();
        assert_eq!(record.status, FileStatus::Pending);

        let record = tracker.begin_upload(&record.id).await.unwrap();
        assert_eq!(record.status, FileStatus::Uploading);

        let record = tracker.finish_upload(&record.id, 120).await.unwrap();
        assert_eq!(record.status, FileStatus::Uploaded);
        assert!(record.uploaded_at.is_some());
        assert_eq!(record.upload_duration_ms, Some(120));

        let record = tracker.begin_processing(&record.id).await.unwrap();
        assert_eq!(record.status, FileStatus::Processing);

        let record = tracker.finish_processing(&record.id, 300).await.unwrap();
        assert_eq!(record.status, FileStatus::Processed);
        assert!(record.processed_at.is_some());
        assert_eq!(record.retry_count, 0);
    }

    #[tokio::test]
    async fn test_cannot_skip_pending_and_uploading() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;

        // Straight from selected: no upload claim, no upload finish
        assert!(matches!(
            tracker.begin_upload(&record.id).await.unwrap_err(),
            PipelineError::Precondition(_)
        ));
        assert!(matches!(
            tracker.finish_upload(&record.id, 10).await.unwrap_err(),
            PipelineError::Precondition(_)
        ));
        assert_eq!(
            tracker.catalog().get(&record.id).await.unwrap().status,
            FileStatus::Selected
        );
    }

    #[tokio::test]
    async fn test_retry_counts_failed_attempts_and_resets_on_success() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;
        tracker
            .apply_classification(&record.id, &Classification::New)
            .await
            .unwrap();

        tracker.begin_upload(&record.id).await.unwrap();
        let failed = tracker.fail_upload(&record.id, "HTTP 500").await.unwrap();
        assert_eq!(failed.status, FileStatus::UploadFailed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("HTTP 500"));

        // Resubmission re-enters uploading, preserving the count
        let retried = tracker.begin_upload(&record.id).await.unwrap();
        assert_eq!(retried.status, FileStatus::Uploading);
        assert_eq!(retried.retry_count, 1);

        let failed = tracker.fail_upload(&record.id, "HTTP 500").await.unwrap();
        assert_eq!(failed.retry_count, 2);

        tracker.begin_upload(&record.id).await.unwrap();
        let uploaded = tracker.finish_upload(&record.id, 50).await.unwrap();
        assert_eq!(uploaded.retry_count, 0);
        assert_eq!(uploaded.error_message, None);
    }

    #[tokio::test]
    async fn test_duplicate_requeue_requires_force() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;
        tracker
            .apply_classification(
                &record.id,
                &Classification::Duplicate {
                    prior_status: FileStatus::Pending,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            tracker.requeue(&record.id, false).await.unwrap_err(),
            PipelineError::Precondition(_)
        ));

        let forced = tracker.requeue(&record.id, true).await.unwrap();
        assert_eq!(forced.status, FileStatus::Pending);
    }

    #[tokio::test]
    async fn test_overwrite_requeues_without_force() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;
        let classified = tracker
            .apply_classification(
                &record.id,
                &Classification::Overwrite {
                    prior_processed: 2,
                    last_processed_at: Some(Utc::now()),
                },
            )
            .await
            .unwrap();
        assert_eq!(classified.status, FileStatus::Overwrite(2));
        assert_eq!(classified.overwrite_count, 2);
        assert!(classified.last_duplicate_at.is_some());

        let queued = tracker.requeue(&record.id, false).await.unwrap();
        assert_eq!(queued.status, FileStatus::Pending);
        // Overwrite provenance survives the requeue
        assert_eq!(queued.overwrite_count, 2);
    }

    #[tokio::test]
    async fn test_revert_processing_returns_to_uploaded() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;
        tracker
            .apply_classification(&record.id, &Classification::New)
            .await
            .unwrap();
        tracker.begin_upload(&record.id).await.unwrap();
        tracker.finish_upload(&record.id, 10).await.unwrap();
        tracker.begin_processing(&record.id).await.unwrap();

        let reverted = tracker
            .revert_processing(&record.id, "connection refused")
            .await
            .unwrap();
        assert_eq!(reverted.status, FileStatus::Uploaded);
        assert_eq!(reverted.retry_count, 1);
        // Still retryable: a later trigger can include it again
        let again = tracker.begin_processing(&record.id).await.unwrap();
        assert_eq!(again.status, FileStatus::Processing);
    }

    #[tokio::test]
    async fn test_precondition_rejection_logs_warning() {
        let (_tmp, tracker) = setup().await;
        let record = register(&tracker, "a.txt", "h1").await;

        let _ = tracker.begin_processing(&record.id).await.unwrap_err();

        let entries = tracker.catalog().audit().recent(10).await.unwrap();
        assert!(entries
            .iter()
            .any(|e| e.level == LogLevel::Warning && e.message.contains("begin processing")));
    }
}
