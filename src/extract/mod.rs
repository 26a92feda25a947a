//! Upstream extraction
//!
//! [`Extractor`] is the seam between the pipeline and the statistics API.
//! [`BeaClient`] is the production implementation; tests substitute their own.

mod bea;

use async_trait::async_trait;
use macro_ingest_core::bea::BeaQuery;
use macro_ingest_core::{strip_code, ErrorCode, PipelineError, RequestParams};
use serde_json::Value;
use thiserror::Error;

pub use bea::BeaClient;

/// A successful pull: the redacted payload and exactly the parameters sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub payload: Value,
    pub request_params: RequestParams,
    pub row_count: u64,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, query: &BeaQuery) -> Result<Extraction, ExtractionError>;
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("[E002] Failed to build HTTP client: {0}")]
    Client(String),

    #[error("[E002] Request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("[E002] Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("[E002] Upstream rejected the credentials (HTTP {status})")]
    Authentication { status: u16 },

    #[error("[E002] Upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Error object inside an otherwise successful response
    #[error("[E002] BEA API error {}: {description}", .code.as_deref().unwrap_or("(no code)"))]
    Api { code: Option<String>, description: String },

    #[error("[E002] Unexpected response shape: {0}")]
    InvalidResponse(String),

    #[error("[E002] No data rows returned for {dataset}/{table_name}")]
    EmptyResult { dataset: String, table_name: String },
}

impl ExtractionError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::E002Extraction
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        PipelineError::Extraction(strip_code(&err.to_string()).to_string())
    }
}
