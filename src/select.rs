//! File selection and registration.
//!
//! Walks the given paths, filters to supported extensions, fingerprints
//! each candidate, classifies it against the catalog, and registers it.
//! Unsupported files never reach the state machine: they produce one
//! warning entry and nothing else. An unreadable file aborts its own
//! registration only.

use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::detect::{self, Classification};
use crate::error::PipelineError;
use crate::events::{EventKind, EventSender};
use crate::hash;
use crate::models::{FileRecord, FileStatus, LogLevel, NewFile};
use crate::tracker::StateTracker;

/// Outcome of one selection run.
#[derive(Debug, Default)]
pub struct SelectionReport {
    pub registered: Vec<FileRecord>,
    pub new_count: usize,
    pub duplicate_count: usize,
    pub overwrite_count: usize,
    pub unsupported_count: usize,
    pub error_count: usize,
}

/// Select files (or directories, walked recursively) for the given host.
pub async fn select_paths(
    tracker: &StateTracker,
    config: &Config,
    host: &str,
    paths: &[PathBuf],
    events: &EventSender,
) -> Result<SelectionReport> {
    let exclude_set = build_globset(&config.files.exclude_globs)?;
    let mut report = SelectionReport::default();

    for path in paths {
        if path.is_dir() {
            let walker = WalkDir::new(path).follow_links(config.files.follow_symlinks);
            for entry in walker {
                // A bad walk entry aborts that entry only, like a
                // hashing failure further down.
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        let at = e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_else(|| path.display().to_string());
                        tracker
                            .catalog()
                            .audit()
                            .append(
                                LogLevel::Error,
                                &format!("failed to walk {}: {}", at, e),
                                None,
                            )
                            .await?;
                        report.error_count += 1;
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(path)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                if exclude_set.is_match(&relative) {
                    continue;
                }
                select_one(tracker, config, host, entry.path(), Some(relative), &mut report, events)
                    .await?;
            }
        } else {
            select_one(tracker, config, host, path, None, &mut report, events).await?;
        }
    }

    Ok(report)
}

async fn select_one(
    tracker: &StateTracker,
    config: &Config,
    host: &str,
    path: &Path,
    relative_path: Option<String>,
    report: &mut SelectionReport,
    events: &EventSender,
) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    // Extension whitelist: filtered before registration, one warning entry
    if let Err(PipelineError::Validation(msg)) = check_extension(config, path) {
        tracker
            .catalog()
            .audit()
            .append(LogLevel::Warning, &msg, None)
            .await?;
        report.unsupported_count += 1;
        return Ok(());
    }

    // Fingerprint. An unreadable file aborts this registration only.
    let checksum = match hash::hash_file(path).await {
        Ok(c) => c,
        Err(e) => {
            tracker
                .catalog()
                .audit()
                .append(
                    LogLevel::Error,
                    &format!("failed to read {}: {}", path.display(), e),
                    None,
                )
                .await?;
            report.error_count += 1;
            return Ok(());
        }
    };

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            tracker
                .catalog()
                .audit()
                .append(
                    LogLevel::Error,
                    &format!("failed to stat {}: {}", path.display(), e),
                    None,
                )
                .await?;
            report.error_count += 1;
            return Ok(());
        }
    };
    let last_modified = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();

    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));

    let priors = tracker.catalog().find(&checksum, host).await?;
    let classification = detect::classify(&priors);

    let record = tracker
        .catalog()
        .register(NewFile {
            name: name.clone(),
            size_bytes: metadata.len() as i64,
            original_path: path
                .canonicalize()
                .unwrap_or_else(|_| path.to_path_buf())
                .display()
                .to_string(),
            relative_path,
            last_modified,
            host: host.to_string(),
            checksum,
            mime_type: extension.as_deref().map(mime_for_extension),
            file_type: extension,
            user_name: Some(config.uploaded_by()),
        })
        .await?;

    let record = tracker
        .apply_classification(&record.id, &classification)
        .await?;

    match &classification {
        Classification::New => {
            report.new_count += 1;
            events.emit(&record.id, &record.name, EventKind::Queued);
        }
        Classification::Duplicate { .. } => report.duplicate_count += 1,
        Classification::Overwrite { .. } => report.overwrite_count += 1,
    }
    report.registered.push(record);

    Ok(())
}

fn check_extension(config: &Config, path: &Path) -> Result<(), PipelineError> {
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    if config
        .files
        .extensions
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(&extension))
    {
        Ok(())
    } else {
        Err(PipelineError::Validation(format!(
            "unsupported file type '{}': {}",
            extension,
            path.display()
        )))
    }
}

fn mime_for_extension(extension: &str) -> String {
    match extension {
        ".pdf" => "application/pdf",
        ".doc" => "application/msword",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".md" => "text/markdown",
        ".txt" => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Render a selection report as the summary block the CLI prints.
pub fn describe_report(report: &SelectionReport, host: &str) -> String {
    let mut out = format!("select (host: {})\n", host);
    out.push_str(&format!("  registered: {}\n", report.registered.len()));
    out.push_str(&format!("  new: {}\n", report.new_count));
    out.push_str(&format!("  duplicates: {}\n", report.duplicate_count));
    out.push_str(&format!("  overwrites: {}\n", report.overwrite_count));
    if report.unsupported_count > 0 {
        out.push_str(&format!("  unsupported: {}\n", report.unsupported_count));
    }
    if report.error_count > 0 {
        out.push_str(&format!("  unreadable: {}\n", report.error_count));
    }
    out
}

/// Records from a selection run that belong in the default upload batch:
/// new (`pending`) plus overwrites. Duplicates stay parked.
pub fn default_batch(report: &SelectionReport) -> Vec<FileRecord> {
    report
        .registered
        .iter()
        .filter(|r| {
            matches!(
                r.status,
                FileStatus::Pending | FileStatus::Overwrite(_)
            )
        })
        .cloned()
        .collect()
}
