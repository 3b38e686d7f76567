//! Pipeline error taxonomy.
//!
//! Orchestration code (CLI commands, batch drivers) uses `anyhow`; the
//! pipeline core returns [`PipelineError`] wherever a caller must branch
//! on the category: a validation failure is filtered before
//! registration, an I/O failure aborts one file, a network failure is
//! retryable, a precondition failure is rejected without mutating state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unsupported file extension or otherwise invalid candidate.
    /// Filtered before registration; never reaches the state machine.
    #[error("validation: {0}")]
    Validation(String),

    /// File could not be read while hashing or uploading. Aborts that
    /// file only.
    #[error("io: {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure: the request never produced a response.
    #[error("network: {0}")]
    Network(String),

    /// The boundary service answered with a non-success status or an
    /// error payload.
    #[error("server: {message}")]
    Server {
        status: Option<u16>,
        message: String,
    },

    /// An operation was requested on a record whose current status does
    /// not permit it. Rejected without mutating state.
    #[error("precondition: {0}")]
    Precondition(String),

    /// Unknown record id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Catalog storage failure.
    #[error("storage: {0}")]
    Storage(#[from] sqlx::Error),
}

impl PipelineError {
    /// Failures that an explicit resubmission can reasonably clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Network(_) | PipelineError::Server { .. }
        )
    }
}
