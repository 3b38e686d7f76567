//! Processing trigger.
//!
//! Once a batch's uploads settle, the boundary service is triggered once
//! per batch (never per file) over the host's upload directory.
//! Triggers for a given host are serialized behind an async mutex: a
//! second call waits for the first to settle, then observes its
//! completed state and finds nothing left to process, so the boundary
//! is never double-counted.
//!
//! Failure handling splits on where the failure happened: a transport
//! failure (the trigger never reached the service) returns the batch to
//! `uploaded` so a later trigger retries it; a failure reported by the
//! service marks the batch `process_failed`.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::api::IngestApi;
use crate::error::PipelineError;
use crate::events::{EventKind, EventSender};
use crate::models::{FileRecord, FileStatus, LogLevel};
use crate::tracker::StateTracker;

/// Batch-level result of one trigger.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub inserted_chunks: u64,
    pub processed: usize,
    pub failed: usize,
    /// Empty batch: nothing was `uploaded` for this host.
    pub empty: bool,
}

pub struct ProcessingTrigger {
    tracker: Arc<StateTracker>,
    api: Arc<dyn IngestApi>,
    uploaded_by: String,
    events: EventSender,
    host_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProcessingTrigger {
    pub fn new(
        tracker: Arc<StateTracker>,
        api: Arc<dyn IngestApi>,
        uploaded_by: String,
        events: EventSender,
    ) -> Self {
        Self {
            tracker,
            api,
            uploaded_by,
            events,
            host_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn host_lock(&self, host: &str) -> Arc<Mutex<()>> {
        let mut locks = self.host_locks.lock().await;
        locks
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Trigger processing for everything currently `uploaded` under
    /// `host`. With `include_failed`, `process_failed` records rejoin
    /// the batch (explicit retry).
    pub async fn trigger(
        &self,
        host: &str,
        base_url: &str,
        directory_path: &str,
        recursive: bool,
        include_failed: bool,
    ) -> Result<ProcessReport> {
        // Serialized per host: no two triggers for the same target in
        // flight concurrently.
        let lock = self.host_lock(host).await;
        let _guard = lock.lock().await;

        let catalog = self.tracker.catalog();

        let mut batch: Vec<FileRecord> = catalog
            .list_in_status(host, &FileStatus::Uploaded)
            .await?;
        if include_failed {
            batch.extend(
                catalog
                    .list_in_status(host, &FileStatus::ProcessFailed)
                    .await?,
            );
        }

        if batch.is_empty() {
            catalog
                .audit()
                .append(
                    LogLevel::Info,
                    &format!("processing trigger for host {}: nothing to process", host),
                    None,
                )
                .await?;
            return Ok(ProcessReport {
                empty: true,
                ..Default::default()
            });
        }

        for record in &batch {
            self.tracker.begin_processing(&record.id).await?;
            self.events
                .emit(&record.id, &record.name, EventKind::ProcessingStarted);
        }

        let total_bytes: i64 = batch.iter().map(|r| r.size_bytes).sum();
        let op_id = catalog
            .op_start("process", host, batch.len(), total_bytes, &self.uploaded_by)
            .await?;

        let start = Instant::now();
        let result = self
            .api
            .process_uploads(base_url, directory_path, recursive)
            .await;
        let duration_ms = (start.elapsed().as_millis() as i64).max(1);

        match result {
            Ok(outcome) => {
                for record in &batch {
                    self.tracker
                        .finish_processing(&record.id, duration_ms)
                        .await?;
                    self.events
                        .emit(&record.id, &record.name, EventKind::Processed { duration_ms });
                }
                catalog
                    .audit()
                    .append(
                        LogLevel::Success,
                        &format!(
                            "processing complete for host {}: {} file(s), {} chunks inserted",
                            host,
                            batch.len(),
                            outcome.inserted_chunks
                        ),
                        None,
                    )
                    .await?;
                catalog.op_finish(&op_id, batch.len(), 0, None).await?;

                Ok(ProcessReport {
                    inserted_chunks: outcome.inserted_chunks,
                    processed: batch.len(),
                    failed: 0,
                    empty: false,
                })
            }
            Err(e) => {
                let error = e.to_string();
                let transport_failure = matches!(e, PipelineError::Network(_));

                for record in &batch {
                    if transport_failure {
                        // Never reached the boundary: stay retryable as uploaded
                        self.tracker.revert_processing(&record.id, &error).await?;
                    } else {
                        self.tracker.fail_processing(&record.id, &error).await?;
                    }
                    self.events.emit(
                        &record.id,
                        &record.name,
                        EventKind::ProcessingFailed {
                            error: error.clone(),
                        },
                    );
                }
                catalog
                    .audit()
                    .append(
                        LogLevel::Error,
                        &format!(
                            "processing failed for host {} ({} file(s)): {}",
                            host,
                            batch.len(),
                            error
                        ),
                        None,
                    )
                    .await?;
                catalog
                    .op_finish(&op_id, 0, batch.len(), Some(&error))
                    .await?;

                Ok(ProcessReport {
                    inserted_chunks: 0,
                    processed: 0,
                    failed: batch.len(),
                    empty: false,
                })
            }
        }
    }
}

/// Render a trigger report as the summary line the CLI prints.
pub fn describe_report(report: &ProcessReport, host: &str) -> String {
    if report.empty {
        format!("process (host: {}): nothing to process", host)
    } else if report.failed > 0 {
        format!(
            "process (host: {}): {} file(s) failed",
            host, report.failed
        )
    } else {
        format!(
            "process (host: {}): {} file(s) processed, {} chunks inserted",
            host, report.processed, report.inserted_chunks
        )
    }
}
