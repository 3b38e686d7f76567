//! Upload coordination.
//!
//! Drives a batch of eligible records through the ingestion boundary
//! with a bounded worker pool: at most `concurrency` transfers in
//! flight, excess records queue in `pending`. The atomic claim in the
//! catalog guarantees a record id is held by at most one worker, so a
//! racing submission loses cleanly instead of double-uploading.
//!
//! Per-file failures never abort the batch; each record settles in
//! `uploaded` or `upload_failed` independently. There is no background
//! retry loop: a failed record moves again only when the operator
//! resubmits it.

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::api::{IngestApi, UploadRequest};
use crate::error::PipelineError;
use crate::events::{EventKind, EventSender};
use crate::models::{FileRecord, FileStatus};
use crate::tracker::StateTracker;

/// Per-record outcome of one submission.
#[derive(Debug, Clone)]
pub enum UploadResult {
    Uploaded { duration_ms: i64 },
    Failed { error: String },
    /// The record was not in an eligible state; nothing was mutated.
    Rejected { reason: String },
    /// The batch was cancelled before this record started.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub record_id: String,
    pub name: String,
    pub result: UploadResult,
}

pub struct UploadCoordinator {
    tracker: Arc<StateTracker>,
    api: Arc<dyn IngestApi>,
    concurrency: usize,
    max_retries: u32,
    uploaded_by: String,
    events: EventSender,
    cancelled: Arc<AtomicBool>,
}

impl UploadCoordinator {
    pub fn new(
        tracker: Arc<StateTracker>,
        api: Arc<dyn IngestApi>,
        concurrency: usize,
        max_retries: u32,
        uploaded_by: String,
        events: EventSender,
    ) -> Self {
        Self {
            tracker,
            api,
            concurrency: concurrency.max(1),
            max_retries,
            uploaded_by,
            events,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for aborting the batch between individual file operations.
    /// An upload already in flight runs to completion or failure.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Submit a batch of records for upload to `base_url`.
    ///
    /// Overwrite-classified records are requeued automatically; anything
    /// not `pending` or `upload_failed` after that is rejected with a
    /// logged precondition warning rather than a fatal error.
    pub async fn submit(
        &self,
        base_url: &str,
        host: &str,
        records: Vec<FileRecord>,
    ) -> Result<Vec<UploadOutcome>> {
        let mut batch: Vec<FileRecord> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for record in records {
            // A record id appears at most once per batch
            if seen.insert(record.id.clone()) {
                batch.push(record);
            }
        }

        // Overwrites rejoin the queue; the operator already opted in by
        // including them.
        for record in &mut batch {
            if matches!(record.status, FileStatus::Overwrite(_)) {
                *record = self.tracker.requeue(&record.id, false).await?;
            }
        }

        let total_bytes: i64 = batch.iter().map(|r| r.size_bytes).sum();
        let op_id = self
            .tracker
            .catalog()
            .op_start("upload", host, batch.len(), total_bytes, &self.uploaded_by)
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<UploadOutcome> = JoinSet::new();

        for record in batch {
            let semaphore = semaphore.clone();
            let tracker = self.tracker.clone();
            let api = self.api.clone();
            let events = self.events.clone();
            let cancelled = self.cancelled.clone();
            let base_url = base_url.to_string();
            let uploaded_by = self.uploaded_by.clone();
            let max_retries = self.max_retries;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

                if cancelled.load(Ordering::SeqCst) {
                    return UploadOutcome {
                        record_id: record.id.clone(),
                        name: record.name.clone(),
                        result: UploadResult::Skipped,
                    };
                }

                upload_one(&tracker, &*api, &events, &base_url, &uploaded_by, max_retries, record)
                    .await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined?);
        }

        let success_count = outcomes
            .iter()
            .filter(|o| matches!(o.result, UploadResult::Uploaded { .. }))
            .count();
        let error_count = outcomes
            .iter()
            .filter(|o| matches!(o.result, UploadResult::Failed { .. }))
            .count();
        self.tracker
            .catalog()
            .op_finish(&op_id, success_count, error_count, None)
            .await?;

        Ok(outcomes)
    }
}

async fn upload_one(
    tracker: &StateTracker,
    api: &dyn IngestApi,
    events: &EventSender,
    base_url: &str,
    uploaded_by: &str,
    max_retries: u32,
    record: FileRecord,
) -> UploadOutcome {
    // Exclusive claim; a loser here was either already taken by another
    // worker or not eligible at all.
    let record = match tracker.begin_upload(&record.id).await {
        Ok(claimed) => claimed,
        Err(e) => {
            return UploadOutcome {
                record_id: record.id,
                name: record.name,
                result: UploadResult::Rejected {
                    reason: e.to_string(),
                },
            }
        }
    };

    events.emit(&record.id, &record.name, EventKind::UploadStarted);
    let start = Instant::now();

    let error = match attempt_upload(api, base_url, uploaded_by, &record, max_retries).await {
        Ok(()) => {
            let duration_ms = (start.elapsed().as_millis() as i64).max(1);
            return match tracker.finish_upload(&record.id, duration_ms).await {
                Ok(_) => {
                    events.emit(&record.id, &record.name, EventKind::Uploaded { duration_ms });
                    UploadOutcome {
                        record_id: record.id,
                        name: record.name,
                        result: UploadResult::Uploaded { duration_ms },
                    }
                }
                Err(e) => UploadOutcome {
                    record_id: record.id,
                    name: record.name,
                    result: UploadResult::Failed {
                        error: e.to_string(),
                    },
                },
            };
        }
        Err(e) => e.to_string(),
    };

    if let Err(e) = tracker.fail_upload(&record.id, &error).await {
        // Catalog failure on top of an upload failure: surface both
        return UploadOutcome {
            record_id: record.id,
            name: record.name,
            result: UploadResult::Failed {
                error: format!("{} (status update failed: {})", error, e),
            },
        };
    }
    events.emit(
        &record.id,
        &record.name,
        EventKind::UploadFailed {
            error: error.clone(),
        },
    );
    UploadOutcome {
        record_id: record.id,
        name: record.name,
        result: UploadResult::Failed { error },
    }
}

/// One logical upload: reads the bytes, then up to `1 + max_retries`
/// calls with exponential backoff on retryable failures. The default
/// budget is zero retries, one attempt per explicit submission.
async fn attempt_upload(
    api: &dyn IngestApi,
    base_url: &str,
    uploaded_by: &str,
    record: &FileRecord,
    max_retries: u32,
) -> Result<(), PipelineError> {
    let bytes = tokio::fs::read(&record.original_path)
        .await
        .map_err(|e| PipelineError::Io {
            path: record.original_path.clone(),
            source: e,
        })?;

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let request = UploadRequest {
            file_name: record.name.clone(),
            bytes: bytes.clone(),
            mime_type: record.mime_type.clone(),
            original_path: record.original_path.clone(),
            uploaded_at: Utc::now(),
            uploaded_by: uploaded_by.to_string(),
        };

        match api.upload(base_url, request).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| PipelineError::Network("upload failed".to_string())))
}

/// Render upload outcomes as the summary block the CLI prints.
pub fn describe_outcomes(outcomes: &[UploadOutcome]) -> String {
    let uploaded = outcomes
        .iter()
        .filter(|o| matches!(o.result, UploadResult::Uploaded { .. }))
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o.result, UploadResult::Failed { .. }))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o.result, UploadResult::Rejected { .. }))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o.result, UploadResult::Skipped))
        .count();

    let mut out = format!(
        "upload: {} uploaded, {} failed, {} rejected",
        uploaded, failed, rejected
    );
    if skipped > 0 {
        out.push_str(&format!(", {} skipped (cancelled)", skipped));
    }
    out
}
