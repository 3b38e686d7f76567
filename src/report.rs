//! Summary reporting.
//!
//! Gives a quick overview of the catalog: how many files sit in each
//! lifecycle state, per-host and per-extension breakdowns, and average
//! transfer timings. Used by `courier report` to confirm batches landed
//! the way the operator expects.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct HostStats {
    host: String,
    total: i64,
    processed: i64,
    failed: i64,
    total_bytes: i64,
}

struct ExtensionStats {
    extension: String,
    count: i64,
    total_bytes: i64,
    avg_upload_ms: Option<f64>,
    avg_process_ms: Option<f64>,
}

pub async fn run_report(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("doc-courier upload report");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Files:       {}", total_files);

    // Per-status counts
    let status_rows =
        sqlx::query("SELECT status, COUNT(*) AS count FROM files GROUP BY status ORDER BY count DESC")
            .fetch_all(&pool)
            .await?;
    for row in &status_rows {
        let status: String = row.get("status");
        let count: i64 = row.get("count");
        println!("    {:<16} {}", status, count);
    }

    let duplicate_hits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM files WHERE status IN ('duplicate', 'overwrite') OR overwrite_count > 0",
    )
    .fetch_one(&pool)
    .await?;
    println!();
    println!("  Duplicate/overwrite selections: {}", duplicate_hits);

    // Per-host breakdown
    let host_rows = sqlx::query(
        r#"
        SELECT
            host,
            COUNT(*) AS total,
            SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END) AS processed,
            SUM(CASE WHEN status IN ('upload_failed', 'process_failed') THEN 1 ELSE 0 END) AS failed,
            SUM(size_bytes) AS total_bytes
        FROM files
        GROUP BY host
        ORDER BY total DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let hosts: Vec<HostStats> = host_rows
        .iter()
        .map(|row| HostStats {
            host: row.get("host"),
            total: row.get("total"),
            processed: row.get("processed"),
            failed: row.get("failed"),
            total_bytes: row.get("total_bytes"),
        })
        .collect();

    if !hosts.is_empty() {
        println!();
        println!("  By host:");
        println!(
            "  {:<16} {:>6} {:>10} {:>8}   {}",
            "HOST", "FILES", "PROCESSED", "FAILED", "SIZE"
        );
        println!("  {}", "-".repeat(58));
        for h in &hosts {
            println!(
                "  {:<16} {:>6} {:>10} {:>8}   {}",
                h.host,
                h.total,
                h.processed,
                h.failed,
                format_bytes(h.total_bytes as u64)
            );
        }
    }

    // Per-extension breakdown with timing averages
    let ext_rows = sqlx::query(
        r#"
        SELECT
            file_type,
            COUNT(*) AS count,
            SUM(size_bytes) AS total_bytes,
            AVG(upload_duration_ms) AS avg_upload_ms,
            AVG(process_duration_ms) AS avg_process_ms
        FROM files
        WHERE file_type IS NOT NULL AND file_type != ''
        GROUP BY file_type
        ORDER BY count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let extensions: Vec<ExtensionStats> = ext_rows
        .iter()
        .map(|row| ExtensionStats {
            extension: row.get("file_type"),
            count: row.get("count"),
            total_bytes: row.get("total_bytes"),
            avg_upload_ms: row.get("avg_upload_ms"),
            avg_process_ms: row.get("avg_process_ms"),
        })
        .collect();

    if !extensions.is_empty() {
        println!();
        println!("  By type:");
        println!(
            "  {:<8} {:>6} {:>10} {:>12} {:>12}",
            "TYPE", "FILES", "SIZE", "AVG UPLOAD", "AVG PROCESS"
        );
        println!("  {}", "-".repeat(54));
        for e in &extensions {
            println!(
                "  {:<8} {:>6} {:>10} {:>12} {:>12}",
                e.extension,
                e.count,
                format_bytes(e.total_bytes as u64),
                format_avg_ms(e.avg_upload_ms),
                format_avg_ms(e.avg_process_ms)
            );
        }
    }

    // Recent operations
    let op_rows = sqlx::query(
        "SELECT kind, host, file_count, success_count, error_count, duration_ms \
         FROM ops ORDER BY started_at DESC LIMIT 10",
    )
    .fetch_all(&pool)
    .await?;

    if !op_rows.is_empty() {
        println!();
        println!("  Recent operations:");
        for row in &op_rows {
            let kind: String = row.get("kind");
            let host: String = row.get("host");
            let file_count: i64 = row.get("file_count");
            let success: i64 = row.get("success_count");
            let errors: i64 = row.get("error_count");
            let duration: Option<i64> = row.get("duration_ms");
            println!(
                "    {:<8} {:<12} {} file(s), {} ok, {} failed{}",
                kind,
                host,
                file_count,
                success,
                errors,
                duration
                    .map(|d| format!(", {} ms", d))
                    .unwrap_or_default()
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_avg_ms(avg: Option<f64>) -> String {
    match avg {
        Some(ms) => format!("{:.0} ms", ms),
        None => "-".to_string(),
    }
}
