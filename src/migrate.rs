use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables on an existing pool. Idempotent.
///
/// Timestamps are Unix milliseconds; durations are wall-clock
/// milliseconds.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Tracked files table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            original_path TEXT NOT NULL,
            relative_path TEXT,
            last_modified INTEGER NOT NULL,
            selected_at INTEGER NOT NULL,
            uploaded_at INTEGER,
            processed_at INTEGER,
            host TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'selected',
            error_message TEXT,
            user_name TEXT,
            computer_name TEXT,
            user_agent TEXT,
            upload_duration_ms INTEGER,
            process_duration_ms INTEGER,
            file_type TEXT,
            mime_type TEXT,
            checksum TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            overwrite_count INTEGER NOT NULL DEFAULT 0,
            last_duplicate_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only audit log. file_id is a weak reference: the entry
    // survives deletion of its record.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS logs (
            id TEXT PRIMARY KEY,
            message TEXT NOT NULL,
            level TEXT NOT NULL DEFAULT 'info',
            timestamp INTEGER NOT NULL,
            file_id TEXT,
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-submission operation stats (one row per upload batch or
    // processing trigger)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ops (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            host TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            duration_ms INTEGER,
            file_count INTEGER NOT NULL DEFAULT 0,
            total_bytes INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            user_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for duplicate lookup and reporting
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_checksum_host ON files(checksum, host)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_status ON files(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_selected_at ON files(selected_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
