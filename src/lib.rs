//! # doc-courier
//!
//! A tracked document upload pipeline with content-hash duplicate
//! detection.
//!
//! doc-courier points at a folder, registers every supported document in
//! a durable SQLite catalog, uploads the files to a remote ingestion
//! service with bounded concurrency, and triggers downstream processing
//! (embedding/indexing) once a batch settles, while recording every
//! lifecycle transition in an append-only audit log and refusing to
//! silently re-ingest content that was already processed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │ Selection │──▶│ Hash +  │──▶│  State   │──▶│   Upload    │
//! │ (walkdir) │   │ Classify│   │ Tracker  │   │ Coordinator │
//! └───────────┘   └─────────┘   └────┬─────┘   └──────┬──────┘
//!                                    │                │
//!                              ┌─────▼─────┐   ┌──────▼──────┐
//!                              │  SQLite   │   │ Processing  │
//!                              │ catalog + │   │   Trigger   │
//!                              │ audit log │   └─────────────┘
//!                              └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! courier init                      # create database
//! courier select ./docs            # register supported files
//! courier upload                    # transfer the pending batch
//! courier process                   # trigger downstream processing
//! courier status                    # inspect the catalog
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the status state space |
//! | [`hash`] | Streamed SHA-256 content fingerprinting |
//! | [`catalog`] | Durable file catalog (source of truth) |
//! | [`detect`] | Duplicate/overwrite classification |
//! | [`tracker`] | Lifecycle state machine |
//! | [`upload`] | Bounded-concurrency upload coordinator |
//! | [`process`] | Per-host serialized processing trigger |
//! | [`audit`] | Append-only audit log |
//! | [`api`] | Ingestion boundary client |
//! | [`events`] | Pipeline event channel |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod api;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod events;
pub mod export;
pub mod hash;
pub mod migrate;
pub mod models;
pub mod process;
pub mod report;
pub mod select;
pub mod tracker;
pub mod upload;
