//! End-to-end pipeline tests against a mock ingestion boundary.
//!
//! The mock stands in for the remote service: uploads and triggers can
//! be programmed to succeed or fail per file, and call counts verify
//! the batching contract (one trigger per batch, never per file).

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use doc_courier::api::{IngestApi, ProcessOutcome, UploadRequest};
use doc_courier::catalog::FileCatalog;
use doc_courier::config::Config;
use doc_courier::error::PipelineError;
use doc_courier::events::EventSender;
use doc_courier::models::FileStatus;
use doc_courier::process::ProcessingTrigger;
use doc_courier::select;
use doc_courier::tracker::StateTracker;
use doc_courier::upload::{UploadCoordinator, UploadResult};
use doc_courier::{db, migrate};

#[derive(Clone, Copy)]
enum ProcessBehavior {
    Succeed { inserted_chunks: u64 },
    NetworkFail,
    ServerFail,
}

struct MockIngestApi {
    /// File names whose uploads are rejected with a server error.
    fail_uploads: Mutex<HashSet<String>>,
    process_behavior: Mutex<ProcessBehavior>,
    upload_calls: AtomicUsize,
    process_calls: AtomicUsize,
    uploads_seen: Mutex<Vec<String>>,
}

impl MockIngestApi {
    fn new() -> Self {
        Self {
            fail_uploads: Mutex::new(HashSet::new()),
            process_behavior: Mutex::new(ProcessBehavior::Succeed { inserted_chunks: 7 }),
            upload_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
            uploads_seen: Mutex::new(Vec::new()),
        }
    }

    fn fail_upload_of(&self, name: &str) {
        self.fail_uploads.lock().unwrap().insert(name.to_string());
    }

    fn set_process_behavior(&self, behavior: ProcessBehavior) {
        *self.process_behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl IngestApi for MockIngestApi {
    async fn upload(&self, _base_url: &str, request: UploadRequest) -> Result<(), PipelineError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads_seen
            .lock()
            .unwrap()
            .push(request.file_name.clone());
        // Small delay so measured durations are nonzero
        tokio::time::sleep(Duration::from_millis(2)).await;

        if self.fail_uploads.lock().unwrap().contains(&request.file_name) {
            return Err(PipelineError::Server {
                status: Some(500),
                message: "HTTP 500: internal error".to_string(),
            });
        }
        Ok(())
    }

    async fn process_uploads(
        &self,
        _base_url: &str,
        _directory_path: &str,
        _recursive: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;

        match *self.process_behavior.lock().unwrap() {
            ProcessBehavior::Succeed { inserted_chunks } => Ok(ProcessOutcome { inserted_chunks }),
            ProcessBehavior::NetworkFail => {
                Err(PipelineError::Network("connection refused".to_string()))
            }
            ProcessBehavior::ServerFail => Err(PipelineError::Server {
                status: Some(500),
                message: "HTTP 500: processing error".to_string(),
            }),
        }
    }

    async fn health(&self, _base_url: &str) -> bool {
        true
    }
}

struct TestEnv {
    _tmp: tempfile::TempDir,
    config: Config,
    tracker: Arc<StateTracker>,
    api: Arc<MockIngestApi>,
    docs: PathBuf,
}

impl TestEnv {
    async fn new(concurrency: usize) -> Self {
        let tmp = tempfile::TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();

        let config: Config = toml::from_str(&format!(
            r#"
            [db]
            path = "{}"

            [hosts.local]
            base_url = "http://127.0.0.1:1"

            [upload]
            concurrency = {}

            [identity]
            uploaded_by = "tester"
            "#,
            tmp.path().join("courier.sqlite").display(),
            concurrency
        ))
        .unwrap();

        let pool = db::connect(&config).await.unwrap();
        migrate::apply_schema(&pool).await.unwrap();

        Self {
            _tmp: tmp,
            config,
            tracker: Arc::new(StateTracker::new(FileCatalog::new(pool))),
            api: Arc::new(MockIngestApi::new()),
            docs,
        }
    }

    fn write_doc(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.docs.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn select(&self) -> select::SelectionReport {
        select::select_paths(
            &self.tracker,
            &self.config,
            "local",
            &[self.docs.clone()],
            &EventSender::disabled(),
        )
        .await
        .unwrap()
    }

    fn coordinator(&self) -> UploadCoordinator {
        UploadCoordinator::new(
            self.tracker.clone(),
            self.api.clone(),
            self.config.upload.concurrency,
            self.config.upload.max_retries,
            "tester".to_string(),
            EventSender::disabled(),
        )
    }

    fn trigger(&self) -> ProcessingTrigger {
        ProcessingTrigger::new(
            self.tracker.clone(),
            self.api.clone(),
            "tester".to_string(),
            EventSender::disabled(),
        )
    }

    async fn upload_pending(&self) -> Vec<doc_courier::upload::UploadOutcome> {
        let batch = self
            .tracker
            .catalog()
            .list_in_status("local", &FileStatus::Pending)
            .await
            .unwrap();
        self.coordinator()
            .submit("http://127.0.0.1:1", "local", batch)
            .await
            .unwrap()
    }

    async fn process(&self) -> doc_courier::process::ProcessReport {
        self.trigger()
            .trigger("local", "http://127.0.0.1:1", "uploads", true, false)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_selection_registers_supported_and_warns_on_unsupported() {
    let env = TestEnv::new(3).await;
    env.write_doc("report.pdf", b"pdf bytes");
    env.write_doc("notes.txt", b"plain text");
    env.write_doc("image.png", b"png bytes");

    let report = env.select().await;

    assert_eq!(report.registered.len(), 2);
    assert_eq!(report.new_count, 2);
    assert_eq!(report.unsupported_count, 1);
    for record in &report.registered {
        assert_eq!(record.status, FileStatus::Pending);
        assert!(!record.checksum.is_empty());
    }

    // The unsupported file produced a warning entry and no record
    let records = env.tracker.catalog().list(Some("local"), None).await.unwrap();
    assert_eq!(records.len(), 2);
    let entries = env.tracker.catalog().audit().recent(50).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.message.contains("unsupported file type") && e.message.contains("image.png")));
}

#[tokio::test]
async fn test_bad_walk_entry_skips_that_entry_only() {
    let mut env = TestEnv::new(3).await;
    env.config.files.follow_symlinks = true;
    env.write_doc("good.txt", b"fine");
    // Following a dangling symlink fails mid-walk
    std::os::unix::fs::symlink(
        env.docs.join("missing.txt"),
        env.docs.join("dangling.txt"),
    )
    .unwrap();

    let report = env.select().await;

    // The good file still registers; the bad entry logs and is skipped
    assert_eq!(report.registered.len(), 1);
    assert_eq!(report.registered[0].name, "good.txt");
    assert_eq!(report.error_count, 1);

    let entries = env.tracker.catalog().audit().recent(50).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.message.contains("failed to walk") && e.message.contains("dangling.txt")));
}

#[tokio::test]
async fn test_full_pipeline_sequential_uploads_then_one_trigger() {
    let env = TestEnv::new(1).await;
    env.write_doc("a.txt", b"alpha");
    env.write_doc("b.txt", b"bravo");
    env.select().await;

    let outcomes = env.upload_pending().await;
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        match &outcome.result {
            UploadResult::Uploaded { duration_ms } => assert!(*duration_ms > 0),
            other => panic!("expected upload success, got {:?}", other),
        }
    }
    assert_eq!(env.api.upload_calls.load(Ordering::SeqCst), 2);

    let report = env.process().await;
    assert_eq!(report.processed, 2);
    assert_eq!(report.inserted_chunks, 7);
    // One trigger for the whole batch
    assert_eq!(env.api.process_calls.load(Ordering::SeqCst), 1);

    for record in env.tracker.catalog().list(Some("local"), None).await.unwrap() {
        assert_eq!(record.status, FileStatus::Processed);
        assert!(record.uploaded_at.is_some());
        assert!(record.processed_at.is_some());
        assert!(record.upload_duration_ms.unwrap() > 0);
        assert!(record.process_duration_ms.unwrap() > 0);
        assert_eq!(record.status.external(), "processed");
    }
}

#[tokio::test]
async fn test_one_failed_upload_does_not_abort_the_batch() {
    let env = TestEnv::new(3).await;
    env.write_doc("good.txt", b"fine");
    env.write_doc("bad.txt", b"rejected");
    env.api.fail_upload_of("bad.txt");
    env.select().await;

    let outcomes = env.upload_pending().await;
    assert_eq!(outcomes.len(), 2);

    let good = env
        .tracker
        .catalog()
        .list(Some("local"), Some("uploaded"))
        .await
        .unwrap();
    assert_eq!(good.len(), 1);
    assert_eq!(good[0].name, "good.txt");

    let bad = env
        .tracker
        .catalog()
        .list(Some("local"), Some("upload_failed"))
        .await
        .unwrap();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].name, "bad.txt");
    assert_eq!(bad[0].retry_count, 1);
    assert!(bad[0].error_message.as_deref().unwrap().contains("500"));
    assert_eq!(bad[0].status.external(), "error");
}

#[tokio::test]
async fn test_failed_upload_resubmits_and_preserves_attempt_count() {
    let env = TestEnv::new(3).await;
    env.write_doc("flaky.txt", b"flaky");
    env.api.fail_upload_of("flaky.txt");
    env.select().await;
    env.upload_pending().await;

    let failed = &env
        .tracker
        .catalog()
        .list(Some("local"), Some("upload_failed"))
        .await
        .unwrap()[0];
    assert_eq!(failed.retry_count, 1);

    // Service recovers; explicit resubmission succeeds and resets the count
    env.api.fail_uploads.lock().unwrap().clear();
    let record = env.tracker.catalog().get(&failed.id).await.unwrap();
    let outcomes = env
        .coordinator()
        .submit("http://127.0.0.1:1", "local", vec![record])
        .await
        .unwrap();
    assert!(matches!(outcomes[0].result, UploadResult::Uploaded { .. }));

    let recovered = env.tracker.catalog().get(&failed.id).await.unwrap();
    assert_eq!(recovered.status, FileStatus::Uploaded);
    assert_eq!(recovered.retry_count, 0);
    assert_eq!(recovered.error_message, None);
}

#[tokio::test]
async fn test_reselect_before_processing_is_a_parked_duplicate() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;

    // Same bytes again before the first copy finished processing
    let report = env.select().await;
    assert_eq!(report.duplicate_count, 1);

    let duplicate = report
        .registered
        .iter()
        .find(|r| r.status == FileStatus::Duplicate)
        .expect("second selection should be a duplicate");
    assert!(duplicate.last_duplicate_at.is_some());

    // Duplicates stay out of the default batch
    let pending = env
        .tracker
        .catalog()
        .list_in_status("local", &FileStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    // Forced requeue opts the duplicate back in
    let forced = env.tracker.requeue(&duplicate.id, true).await.unwrap();
    assert_eq!(forced.status, FileStatus::Pending);
}

#[tokio::test]
async fn test_reselect_after_processing_is_an_overwrite() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;
    env.upload_pending().await;
    env.process().await;

    let prior = &env
        .tracker
        .catalog()
        .list(Some("local"), Some("processed"))
        .await
        .unwrap()[0];
    let prior_processed_at = prior.processed_at.unwrap();

    let report = env.select().await;
    assert_eq!(report.overwrite_count, 1);
    let overwrite = report
        .registered
        .iter()
        .find(|r| matches!(r.status, FileStatus::Overwrite(_)))
        .expect("re-selection should classify as overwrite");

    assert_eq!(overwrite.status, FileStatus::Overwrite(1));
    assert_eq!(overwrite.overwrite_count, 1);
    // Points at the prior ingestion's completion time
    assert_eq!(overwrite.last_duplicate_at, Some(prior_processed_at));

    // Overwrites join the upload batch without --force
    let batch = select::default_batch(&report);
    assert_eq!(batch.len(), 1);
    let outcomes = env
        .coordinator()
        .submit("http://127.0.0.1:1", "local", batch)
        .await
        .unwrap();
    assert!(matches!(outcomes[0].result, UploadResult::Uploaded { .. }));
}

#[tokio::test]
async fn test_trigger_is_idempotent_after_completion() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;
    env.upload_pending().await;

    let first = env.process().await;
    assert_eq!(first.processed, 1);

    // Nothing left uploaded: the repeat trigger never reaches the service
    let second = env.process().await;
    assert!(second.empty);
    assert_eq!(env.api.process_calls.load(Ordering::SeqCst), 1);

    let record = &env.tracker.catalog().list(Some("local"), None).await.unwrap()[0];
    assert_eq!(record.status, FileStatus::Processed);
}

#[tokio::test]
async fn test_trigger_transport_failure_keeps_batch_retryable() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;
    env.upload_pending().await;

    env.api.set_process_behavior(ProcessBehavior::NetworkFail);
    let report = env.process().await;
    assert_eq!(report.failed, 1);

    // The trigger never reached the service, so the record falls back
    // to uploaded and a later trigger picks it up again.
    let record = &env.tracker.catalog().list(Some("local"), None).await.unwrap()[0];
    assert_eq!(record.status, FileStatus::Uploaded);
    assert_eq!(record.retry_count, 1);

    env.api
        .set_process_behavior(ProcessBehavior::Succeed { inserted_chunks: 3 });
    let retry = env.process().await;
    assert_eq!(retry.processed, 1);
    assert_eq!(retry.inserted_chunks, 3);
}

#[tokio::test]
async fn test_trigger_server_failure_marks_batch_process_failed() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;
    env.upload_pending().await;

    env.api.set_process_behavior(ProcessBehavior::ServerFail);
    env.process().await;

    let record = &env.tracker.catalog().list(Some("local"), None).await.unwrap()[0];
    assert_eq!(record.status, FileStatus::ProcessFailed);

    // A plain trigger skips it; include_failed retries it
    env.api
        .set_process_behavior(ProcessBehavior::Succeed { inserted_chunks: 1 });
    let plain = env.process().await;
    assert!(plain.empty);

    let retried = env
        .trigger()
        .trigger("local", "http://127.0.0.1:1", "uploads", true, true)
        .await
        .unwrap();
    assert_eq!(retried.processed, 1);
}

#[tokio::test]
async fn test_duplicate_batch_entries_upload_once() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;

    let pending = env
        .tracker
        .catalog()
        .list_in_status("local", &FileStatus::Pending)
        .await
        .unwrap();
    let mut batch = pending.clone();
    batch.extend(pending);

    let outcomes = env
        .coordinator()
        .submit("http://127.0.0.1:1", "local", batch)
        .await
        .unwrap();
    // Deduplicated down to one attempt
    assert_eq!(outcomes.len(), 1);
    assert_eq!(env.api.upload_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_batch_skips_unstarted_records() {
    let env = TestEnv::new(1).await;
    env.write_doc("a.txt", b"alpha");
    env.write_doc("b.txt", b"bravo");
    env.select().await;

    let coordinator = env.coordinator();
    coordinator
        .cancel_handle()
        .store(true, Ordering::SeqCst);

    let batch = env
        .tracker
        .catalog()
        .list_in_status("local", &FileStatus::Pending)
        .await
        .unwrap();
    let outcomes = coordinator
        .submit("http://127.0.0.1:1", "local", batch)
        .await
        .unwrap();

    assert!(outcomes
        .iter()
        .all(|o| matches!(o.result, UploadResult::Skipped)));
    assert_eq!(env.api.upload_calls.load(Ordering::SeqCst), 0);

    // Skipped records keep their queue position
    let pending = env
        .tracker
        .catalog()
        .list_in_status("local", &FileStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn test_uploads_carry_operator_identity_and_metadata() {
    let env = TestEnv::new(3).await;
    env.write_doc("a.txt", b"alpha");
    env.select().await;
    env.upload_pending().await;

    let seen = env.api.uploads_seen.lock().unwrap();
    assert_eq!(seen.as_slice(), ["a.txt"]);

    let record = &env.tracker.catalog().list(Some("local"), None).await.unwrap()[0];
    assert_eq!(record.user_name.as_deref(), Some("tester"));
    assert_eq!(record.file_type.as_deref(), Some(".txt"));
    assert_eq!(record.mime_type.as_deref(), Some("text/plain"));
}
