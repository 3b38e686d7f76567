//! Ingestion boundary client.
//!
//! The pipeline talks to the backend through the [`IngestApi`] trait so
//! the coordinator and trigger stay testable without a live service.
//! [`HttpIngestApi`] is the production implementation: multipart upload
//! to `POST {base}/upload`, batch trigger to `POST {base}/process-uploads`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::error::PipelineError;

/// One file handed to the ingestion endpoint, plus the metadata fields
/// the service records alongside it.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub original_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
}

/// Result of a processing trigger: how many chunks the boundary
/// reported inserting for the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub inserted_chunks: u64,
}

#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Upload one file. A clean response means the service accepted the
    /// bytes; any server-reported failure surfaces as `Server`.
    async fn upload(&self, base_url: &str, request: UploadRequest) -> Result<(), PipelineError>;

    /// Trigger processing over everything uploaded under `directory_path`.
    /// Called once per batch, never per file.
    async fn process_uploads(
        &self,
        base_url: &str,
        directory_path: &str,
        recursive: bool,
    ) -> Result<ProcessOutcome, PipelineError>;

    /// Cheap reachability probe for `courier hosts`.
    async fn health(&self, base_url: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    success: bool,
    result: Option<ProcessResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProcessResult {
    inserted_chunks: u64,
}

pub struct HttpIngestApi {
    upload_client: reqwest::Client,
    process_client: reqwest::Client,
}

impl HttpIngestApi {
    pub fn new(upload_timeout_secs: u64, process_timeout_secs: u64) -> Result<Self, PipelineError> {
        let upload_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(upload_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Network(e.to_string()))?;
        let process_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(process_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Network(e.to_string()))?;
        Ok(Self {
            upload_client,
            process_client,
        })
    }
}

#[async_trait]
impl IngestApi for HttpIngestApi {
    async fn upload(&self, base_url: &str, request: UploadRequest) -> Result<(), PipelineError> {
        let mut part = reqwest::multipart::Part::bytes(request.bytes)
            .file_name(request.file_name.clone());
        if let Some(mime) = &request.mime_type {
            part = part
                .mime_str(mime)
                .map_err(|e| PipelineError::Network(e.to_string()))?;
        }

        let form = reqwest::multipart::Form::new()
            .part("files", part)
            .text("uploaded_at", request.uploaded_at.to_rfc3339())
            .text("uploaded_by", request.uploaded_by)
            .text("original_path", request.original_path);

        let response = self
            .upload_client
            .post(format!("{}/upload", base_url.trim_end_matches('/')))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Server {
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Network(format!("invalid upload response: {}", e)))?;

        if !body.success {
            return Err(PipelineError::Server {
                status: Some(status.as_u16()),
                message: body
                    .message
                    .unwrap_or_else(|| "upload rejected".to_string()),
            });
        }

        Ok(())
    }

    async fn process_uploads(
        &self,
        base_url: &str,
        directory_path: &str,
        recursive: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        let response = self
            .process_client
            .post(format!(
                "{}/process-uploads",
                base_url.trim_end_matches('/')
            ))
            .json(&serde_json::json!({
                "directory_path": directory_path,
                "recursive": recursive,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Server {
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let body: ProcessResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Network(format!("invalid process response: {}", e)))?;

        if !body.success {
            return Err(PipelineError::Server {
                status: Some(status.as_u16()),
                message: body
                    .error
                    .unwrap_or_else(|| "processing rejected".to_string()),
            });
        }

        Ok(ProcessOutcome {
            inserted_chunks: body.result.map(|r| r.inserted_chunks).unwrap_or(0),
        })
    }

    async fn health(&self, base_url: &str) -> bool {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        match self
            .process_client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
