//! Storage operator construction

use macro_ingest_config::{StorageBackend, StorageConfig};
use opendal::Operator;

use crate::error::{Result, WriterError};

/// Build an OpenDAL operator for the configured backend.
pub fn build_operator(config: &StorageConfig) -> Result<Operator> {
    let backend = config.backend();
    let operator = match backend {
        StorageBackend::Fs => {
            let builder = opendal::services::Fs::default().root(&config.fs.path);
            Operator::new(builder)
                .map_err(|e| {
                    WriterError::invalid_config(format!("Failed to create filesystem operator: {e}"))
                })?
                .finish()
        }
        StorageBackend::S3 => {
            let s3 = &config.s3;
            if s3.bucket.is_empty() {
                return Err(WriterError::invalid_config("S3_DATA_BUCKET is required for the s3 backend"));
            }

            let mut builder = opendal::services::S3::default()
                .bucket(&s3.bucket)
                .region(&s3.region);

            if let Some(endpoint) = &s3.endpoint {
                builder = builder.endpoint(endpoint);
            }

            Operator::new(builder)
                .map_err(|e| WriterError::invalid_config(format!("Failed to create S3 operator: {e}")))?
                .finish()
        }
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .map_err(|e| WriterError::invalid_config(format!("Failed to create memory operator: {e}")))?
            .finish(),
    };

    tracing::debug!(backend = %backend, "Storage operator initialized");
    Ok(operator)
}
