//! # doc-courier CLI (`courier`)
//!
//! The `courier` binary drives the upload pipeline: register documents,
//! push them to the configured ingestion target, trigger downstream
//! processing, and inspect the audit trail.
//!
//! ## Usage
//!
//! ```bash
//! courier --config ./config/courier.toml --host local <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `courier init` | Create the SQLite database and run schema migrations |
//! | `courier select <paths>` | Register supported files (hash + classify) |
//! | `courier upload` | Upload the pending batch with bounded concurrency |
//! | `courier process` | Trigger downstream processing for uploaded files |
//! | `courier run <paths>` | select + upload + process in one pass |
//! | `courier retry <id>` | Resubmit one failed record, preserving its retry count |
//! | `courier status` | List tracked records |
//! | `courier logs` | Show recent audit entries |
//! | `courier report` | Summary statistics |
//! | `courier export` | Dump files + logs + ops as JSON |
//! | `courier hosts` | List configured targets and probe their health |
//! | `courier clear` | Delete records (operator-initiated only) |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use doc_courier::api::{HttpIngestApi, IngestApi};
use doc_courier::catalog::FileCatalog;
use doc_courier::config::{self, Config};
use doc_courier::models::{FileStatus, LogLevel};
use doc_courier::process::{self, ProcessingTrigger};
use doc_courier::select;
use doc_courier::tracker::StateTracker;
use doc_courier::upload::{self, UploadCoordinator};
use doc_courier::{db, events, export, migrate, report};

/// doc-courier: a tracked document upload pipeline with content-hash
/// duplicate detection.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file and a `--host` flag naming the backend target. See
/// `config/courier.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "courier",
    about = "doc-courier: tracked document uploads with duplicate detection",
    version,
    long_about = "doc-courier registers documents in a durable catalog, detects content \
    that was already ingested, uploads new files to a remote ingestion service with bounded \
    concurrency, and triggers downstream processing, recording every transition in an \
    append-only audit log."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/courier.toml")]
    config: PathBuf,

    /// Backend target to operate against. Must match a `[hosts.<name>]`
    /// entry in the config; part of every record's identity scope.
    #[arg(long, global = true, default_value = "local")]
    host: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (files,
    /// logs, ops). Idempotent; running it multiple times is safe.
    Init,

    /// Register files or directories for the current host.
    ///
    /// Walks directories recursively, filters to supported extensions,
    /// fingerprints each file, and classifies it as new, duplicate, or
    /// overwrite against the catalog. New files queue for upload;
    /// duplicates park until explicitly forced.
    Select {
        /// Files or directories to register.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Upload the pending batch to the ingestion service.
    ///
    /// Includes everything `pending` plus overwrite-classified records.
    /// Transfers run through a bounded worker pool; per-file failures
    /// never abort the batch.
    Upload {
        /// Upload only these record ids instead of the default batch.
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Requeue duplicate-classified records among `--id` arguments.
        #[arg(long)]
        force: bool,
    },

    /// Trigger downstream processing for everything uploaded.
    ///
    /// Calls the processing endpoint once for the batch. Triggers for
    /// the same host are serialized; a repeat call after completion
    /// finds nothing left and is a no-op.
    Process {
        /// Ask the service to process the upload directory recursively.
        #[arg(long, default_value_t = true)]
        recursive: bool,
    },

    /// Select, upload, and process in one pass.
    Run {
        /// Files or directories to register.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Resubmit one failed record, preserving its retry count.
    ///
    /// An `upload_failed` record re-enters uploading; a `process_failed`
    /// record rejoins the next processing batch for its host.
    Retry {
        /// Record id (as shown by `courier status`).
        id: String,
    },

    /// List tracked records for the current host.
    Status {
        /// Filter by internal status (e.g. `pending`, `upload_failed`).
        #[arg(long)]
        state: Option<String>,

        /// List records for every host, not just the current one.
        #[arg(long)]
        all_hosts: bool,
    },

    /// Show recent audit log entries, newest first.
    Logs {
        /// Number of entries to show.
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: i64,
    },

    /// Print summary statistics for the catalog.
    Report,

    /// Export files, audit log, and operation stats as JSON.
    Export {
        /// Output file path. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List configured hosts and probe their health endpoints.
    Hosts,

    /// Delete tracked records. Audit entries survive with their file
    /// references nulled unless `--logs` is also given.
    Clear {
        /// Clear records for every host, not just the current one.
        #[arg(long)]
        all_hosts: bool,

        /// Also clear the audit log and operation stats.
        #[arg(long)]
        logs: bool,
    },
}

/// Shared handles for commands that run the pipeline.
struct App {
    config: Config,
    tracker: Arc<StateTracker>,
    api: Arc<dyn IngestApi>,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply_schema(&pool).await?;
        let tracker = Arc::new(StateTracker::new(FileCatalog::new(pool)));
        let api: Arc<dyn IngestApi> = Arc::new(HttpIngestApi::new(
            config.upload.timeout_secs,
            config.upload.process_timeout_secs,
        )?);
        Ok(Self {
            config,
            tracker,
            api,
        })
    }

    /// Event channel wired to a stdout progress printer.
    fn progress_events(&self) -> events::EventSender {
        let (tx, mut rx) = events::channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                println!("  {}", events::describe(&event));
            }
        });
        tx
    }

    fn coordinator(&self, tx: events::EventSender) -> UploadCoordinator {
        UploadCoordinator::new(
            self.tracker.clone(),
            self.api.clone(),
            self.config.upload.concurrency,
            self.config.upload.max_retries,
            self.config.uploaded_by(),
            tx,
        )
    }

    fn trigger(&self, tx: events::EventSender) -> ProcessingTrigger {
        ProcessingTrigger::new(
            self.tracker.clone(),
            self.api.clone(),
            self.config.uploaded_by(),
            tx,
        )
    }

    /// Default upload batch: everything pending plus overwrites.
    async fn default_batch(&self, host: &str) -> Result<Vec<doc_courier::models::FileRecord>> {
        let catalog = self.tracker.catalog();
        let mut batch = catalog.list_in_status(host, &FileStatus::Pending).await?;
        batch.extend(
            catalog
                .list_in_status(host, &FileStatus::Overwrite(0))
                .await?,
        );
        Ok(batch)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Select { paths } => {
            let app = App::open(cfg).await?;
            app.config.host(&cli.host)?;
            let tx = app.progress_events();
            let report =
                select::select_paths(&app.tracker, &app.config, &cli.host, &paths, &tx).await?;
            print!("{}", select::describe_report(&report, &cli.host));
            if report.duplicate_count > 0 {
                println!(
                    "  (duplicates are excluded from upload; use `courier upload --id <id> --force`)"
                );
            }
            println!("ok");
        }
        Commands::Upload { ids, force } => {
            let app = App::open(cfg).await?;
            let host = app.config.host(&cli.host)?.clone();
            let tx = app.progress_events();

            let batch = if ids.is_empty() {
                app.default_batch(&cli.host).await?
            } else {
                let mut batch = Vec::new();
                for id in &ids {
                    let mut record = app.tracker.catalog().get(id).await?;
                    if force && record.status == FileStatus::Duplicate {
                        record = app.tracker.requeue(id, true).await?;
                    }
                    batch.push(record);
                }
                batch
            };

            if batch.is_empty() {
                println!("upload: nothing to upload for host {}", cli.host);
                return Ok(());
            }

            let coordinator = app.coordinator(tx);
            let outcomes = coordinator.submit(&host.base_url, &cli.host, batch).await?;
            println!("{}", upload::describe_outcomes(&outcomes));
            println!("ok");
        }
        Commands::Process { recursive } => {
            let app = App::open(cfg).await?;
            let host = app.config.host(&cli.host)?.clone();
            let tx = app.progress_events();
            let trigger = app.trigger(tx);
            let report = trigger
                .trigger(&cli.host, &host.base_url, &host.upload_dir, recursive, false)
                .await?;
            println!("{}", process::describe_report(&report, &cli.host));
            println!("ok");
        }
        Commands::Run { paths } => {
            let app = App::open(cfg).await?;
            let host = app.config.host(&cli.host)?.clone();
            let tx = app.progress_events();

            let selection =
                select::select_paths(&app.tracker, &app.config, &cli.host, &paths, &tx).await?;
            print!("{}", select::describe_report(&selection, &cli.host));

            let batch = select::default_batch(&selection);
            if !batch.is_empty() {
                let coordinator = app.coordinator(tx.clone());
                let outcomes = coordinator.submit(&host.base_url, &cli.host, batch).await?;
                println!("{}", upload::describe_outcomes(&outcomes));
            }

            let trigger = app.trigger(tx);
            let report = trigger
                .trigger(&cli.host, &host.base_url, &host.upload_dir, true, false)
                .await?;
            println!("{}", process::describe_report(&report, &cli.host));
            println!("ok");
        }
        Commands::Retry { id } => {
            let app = App::open(cfg).await?;
            let host = app.config.host(&cli.host)?.clone();
            let tx = app.progress_events();
            let record = app.tracker.catalog().get(&id).await?;

            match &record.status {
                FileStatus::UploadFailed => {
                    let coordinator = app.coordinator(tx);
                    let outcomes = coordinator
                        .submit(&host.base_url, &cli.host, vec![record])
                        .await?;
                    println!("{}", upload::describe_outcomes(&outcomes));
                }
                FileStatus::ProcessFailed => {
                    let trigger = app.trigger(tx);
                    let report = trigger
                        .trigger(&cli.host, &host.base_url, &host.upload_dir, true, true)
                        .await?;
                    println!("{}", process::describe_report(&report, &cli.host));
                }
                FileStatus::Duplicate => {
                    anyhow::bail!(
                        "{} is a duplicate; use `courier upload --id {} --force` to re-ingest",
                        record.label(),
                        record.id
                    );
                }
                other => {
                    anyhow::bail!("{} is '{}', nothing to retry", record.label(), other);
                }
            }
            println!("ok");
        }
        Commands::Status { state, all_hosts } => {
            let app = App::open(cfg).await?;
            let host_filter = if all_hosts { None } else { Some(cli.host.as_str()) };
            let records = app
                .tracker
                .catalog()
                .list(host_filter, state.as_deref())
                .await?;

            if records.is_empty() {
                println!("no records");
                return Ok(());
            }

            println!(
                "{:<38} {:<24} {:<14} {:<10} {:<12} {}",
                "ID", "NAME", "STATUS", "EXTERNAL", "HOST", "NOTES"
            );
            for record in &records {
                let mut notes = String::new();
                if let FileStatus::Overwrite(n) = record.status {
                    notes.push_str(&format!("overwrite x{}", n));
                } else if record.overwrite_count > 0 {
                    notes.push_str(&format!("re-ingested x{}", record.overwrite_count));
                }
                if record.retry_count > 0 {
                    if !notes.is_empty() {
                        notes.push_str(", ");
                    }
                    notes.push_str(&format!("{} failed attempt(s)", record.retry_count));
                }
                println!(
                    "{:<38} {:<24} {:<14} {:<10} {:<12} {}",
                    record.id,
                    record.name,
                    record.status.to_string(),
                    record.status.external(),
                    record.host,
                    notes
                );
            }
        }
        Commands::Logs { limit } => {
            let app = App::open(cfg).await?;
            let entries = app.tracker.catalog().audit().recent(limit).await?;
            for entry in &entries {
                let marker = match entry.level {
                    LogLevel::Info => " ",
                    LogLevel::Success => "+",
                    LogLevel::Warning => "!",
                    LogLevel::Error => "x",
                };
                println!(
                    "{} {} {}",
                    marker,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.message
                );
            }
        }
        Commands::Report => {
            report::run_report(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Hosts => {
            let app = App::open(cfg).await?;
            println!("{:<16} {:<40} {}", "HOST", "BASE URL", "HEALTH");
            for (name, host) in &app.config.hosts {
                let healthy = app.api.health(&host.base_url).await;
                println!(
                    "{:<16} {:<40} {}",
                    name,
                    host.base_url,
                    if healthy { "ok" } else { "unreachable" }
                );
            }
        }
        Commands::Clear { all_hosts, logs } => {
            let app = App::open(cfg).await?;
            let host_filter = if all_hosts { None } else { Some(cli.host.as_str()) };
            let deleted = app.tracker.catalog().clear(host_filter).await?;
            println!("cleared {} record(s)", deleted);
            if logs {
                let entries = app.tracker.catalog().audit().clear().await?;
                let ops = app.tracker.catalog().clear_ops(host_filter).await?;
                println!("cleared {} log entries, {} op record(s)", entries, ops);
            }
        }
    }

    Ok(())
}
