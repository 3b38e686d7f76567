//! Export the catalog as JSON for point-in-time reporting.
//!
//! Produces a single JSON document containing all tracked files (with
//! their external status projection alongside the internal state), the
//! full audit log, and operation stats.

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use std::path::Path;

use crate::config::Config;
use crate::db;

#[derive(Serialize)]
struct ExportData {
    files: Vec<ExportFile>,
    logs: Vec<ExportLog>,
    ops: Vec<ExportOp>,
}

#[derive(Serialize)]
struct ExportFile {
    id: String,
    name: String,
    size_bytes: i64,
    host: String,
    status: String,
    external_status: String,
    checksum: String,
    selected_at: i64,
    uploaded_at: Option<i64>,
    processed_at: Option<i64>,
    retry_count: i64,
    overwrite_count: i64,
    error_message: Option<String>,
    user_name: Option<String>,
}

#[derive(Serialize)]
struct ExportLog {
    id: String,
    message: String,
    level: String,
    timestamp: i64,
    file_id: Option<String>,
}

#[derive(Serialize)]
struct ExportOp {
    id: String,
    kind: String,
    host: String,
    started_at: i64,
    duration_ms: Option<i64>,
    file_count: i64,
    success_count: i64,
    error_count: i64,
}

/// Export files, logs, and operation stats as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;

    let file_rows = sqlx::query(
        "SELECT id, name, size_bytes, host, status, overwrite_count, checksum, selected_at, \
         uploaded_at, processed_at, retry_count, error_message, user_name \
         FROM files ORDER BY selected_at",
    )
    .fetch_all(&pool)
    .await?;

    let files: Vec<ExportFile> = file_rows
        .iter()
        .map(|row| {
            let status: String = row.get("status");
            let overwrite_count: i64 = row.get("overwrite_count");
            let external_status =
                crate::models::FileStatus::from_db(&status, overwrite_count as u32)
                    .map(|s| s.external().to_string())
                    .unwrap_or_else(|| "error".to_string());
            ExportFile {
                id: row.get("id"),
                name: row.get("name"),
                size_bytes: row.get("size_bytes"),
                host: row.get("host"),
                status,
                external_status,
                checksum: row.get("checksum"),
                selected_at: row.get("selected_at"),
                uploaded_at: row.get("uploaded_at"),
                processed_at: row.get("processed_at"),
                retry_count: row.get("retry_count"),
                overwrite_count,
                error_message: row.get("error_message"),
                user_name: row.get("user_name"),
            }
        })
        .collect();

    let log_rows = sqlx::query(
        "SELECT id, message, level, timestamp, file_id FROM logs ORDER BY timestamp",
    )
    .fetch_all(&pool)
    .await?;

    let logs: Vec<ExportLog> = log_rows
        .iter()
        .map(|row| ExportLog {
            id: row.get("id"),
            message: row.get("message"),
            level: row.get("level"),
            timestamp: row.get("timestamp"),
            file_id: row.get("file_id"),
        })
        .collect();

    let op_rows = sqlx::query(
        "SELECT id, kind, host, started_at, duration_ms, file_count, success_count, error_count \
         FROM ops ORDER BY started_at",
    )
    .fetch_all(&pool)
    .await?;

    let ops: Vec<ExportOp> = op_rows
        .iter()
        .map(|row| ExportOp {
            id: row.get("id"),
            kind: row.get("kind"),
            host: row.get("host"),
            started_at: row.get("started_at"),
            duration_ms: row.get("duration_ms"),
            file_count: row.get("file_count"),
            success_count: row.get("success_count"),
            error_count: row.get("error_count"),
        })
        .collect();

    let file_count = files.len();
    let log_count = logs.len();

    let data = ExportData { files, logs, ops };
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} files, {} log entries to {}",
                file_count,
                log_count,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    pool.close().await;
    Ok(())
}
