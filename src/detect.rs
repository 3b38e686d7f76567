//! Duplicate classification.
//!
//! Pure decision logic over the prior records the catalog returns for a
//! hash+host pair. Classification keys strictly on whether any prior
//! record ever reached `processed`; timestamps are reported alongside
//! but never drive the decision.

use chrono::{DateTime, Utc};

use crate::models::{FileRecord, FileStatus};

/// Outcome of classifying a newly selected file against its priors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No prior record with the same hash for this host.
    New,
    /// Priors exist but none finished processing. Carries the most
    /// recent prior's current status so the operator can tell "already
    /// uploading" from "previously failed".
    Duplicate { prior_status: FileStatus },
    /// At least one prior finished processing. `prior_processed` is the
    /// count of completed ingestions; `last_processed_at` the most
    /// recent completion.
    Overwrite {
        prior_processed: u32,
        last_processed_at: Option<DateTime<Utc>>,
    },
}

/// Classify against prior records for the same hash+host, ordered by
/// `selected_at` ascending (the catalog's `find` ordering). Reads only;
/// never mutates.
pub fn classify(priors: &[FileRecord]) -> Classification {
    if priors.is_empty() {
        return Classification::New;
    }

    let processed: Vec<&FileRecord> = priors
        .iter()
        .filter(|r| r.processed_at.is_some())
        .collect();

    if !processed.is_empty() {
        let last_processed_at = processed.iter().filter_map(|r| r.processed_at).max();
        return Classification::Overwrite {
            prior_processed: processed.len() as u32,
            last_processed_at,
        };
    }

    // Tie-break: report against the most recently selected prior.
    let most_recent = priors
        .last()
        .expect("non-empty priors checked above");

    Classification::Duplicate {
        prior_status: most_recent.status.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: FileStatus, processed_at: Option<DateTime<Utc>>, age_secs: i64) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: "a.txt".to_string(),
            size_bytes: 10,
            original_path: "/docs/a.txt".to_string(),
            relative_path: None,
            last_modified: now,
            selected_at: now - Duration::seconds(age_secs),
            uploaded_at: None,
            processed_at,
            host: "local".to_string(),
            status,
            error_message: None,
            user_name: None,
            upload_duration_ms: None,
            process_duration_ms: None,
            file_type: None,
            mime_type: None,
            checksum: "abc".to_string(),
            retry_count: 0,
            overwrite_count: 0,
            last_duplicate_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_no_priors_is_new() {
        assert_eq!(classify(&[]), Classification::New);
    }

    #[test]
    fn test_unprocessed_prior_is_duplicate_with_status() {
        let priors = vec![record(FileStatus::Uploading, None, 60)];
        assert_eq!(
            classify(&priors),
            Classification::Duplicate {
                prior_status: FileStatus::Uploading
            }
        );
    }

    #[test]
    fn test_duplicate_reports_most_recent_prior() {
        // Oldest first, as the catalog returns them
        let priors = vec![
            record(FileStatus::UploadFailed, None, 120),
            record(FileStatus::Pending, None, 10),
        ];
        assert_eq!(
            classify(&priors),
            Classification::Duplicate {
                prior_status: FileStatus::Pending
            }
        );
    }

    #[test]
    fn test_processed_prior_is_overwrite() {
        let done = Utc::now() - Duration::seconds(30);
        let priors = vec![record(FileStatus::Processed, Some(done), 60)];
        assert_eq!(
            classify(&priors),
            Classification::Overwrite {
                prior_processed: 1,
                last_processed_at: Some(done),
            }
        );
    }

    #[test]
    fn test_overwrite_counts_all_completed_ingestions() {
        let first = Utc::now() - Duration::seconds(600);
        let second = Utc::now() - Duration::seconds(60);
        let priors = vec![
            record(FileStatus::Processed, Some(first), 700),
            record(FileStatus::Processed, Some(second), 100),
            record(FileStatus::UploadFailed, None, 5),
        ];
        assert_eq!(
            classify(&priors),
            Classification::Overwrite {
                prior_processed: 2,
                last_processed_at: Some(second),
            }
        );
    }

    #[test]
    fn test_overwrite_wins_over_failed_priors() {
        // A processed prior anywhere in history forces overwrite, even
        // if the latest prior never got that far.
        let done = Utc::now() - Duration::seconds(300);
        let priors = vec![
            record(FileStatus::Processed, Some(done), 400),
            record(FileStatus::UploadFailed, None, 10),
        ];
        match classify(&priors) {
            Classification::Overwrite {
                prior_processed, ..
            } => assert_eq!(prior_processed, 1),
            other => panic!("expected overwrite, got {:?}", other),
        }
    }
}
