//! Error types for the raw-store writer

use macro_ingest_core::{strip_code, ErrorCode, PipelineError, SerializationError};
use thiserror::Error;

/// Errors that can occur while reading or writing layer objects
#[derive(Debug, Error)]
pub enum WriterError {
    /// Object storage call failed
    #[error("[{code}] Storage {operation} failed for '{path}': {source}")]
    Storage {
        code: &'static str,
        operation: &'static str,
        path: String,
        #[source]
        source: opendal::Error,
    },

    /// Parquet encode/decode failed
    #[error("[{code}] Parquet {direction} failed for '{path}': {reason}")]
    Parquet {
        code: &'static str,
        direction: &'static str,
        path: String,
        reason: String,
    },

    /// A stored object could not be interpreted
    #[error("[{code}] Object '{path}' is not a valid {what}: {reason}")]
    Corrupt {
        code: &'static str,
        path: String,
        what: &'static str,
        reason: String,
    },

    /// A manifest lacks what is needed to place it
    #[error("[{code}] Manifest for run '{run_id}' cannot be stored: {reason}")]
    IncompleteManifest {
        code: &'static str,
        run_id: String,
        reason: String,
    },

    /// Invalid storage configuration
    #[error("[{code}] Invalid storage configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl WriterError {
    pub fn storage(operation: &'static str, path: impl Into<String>, source: opendal::Error) -> Self {
        Self::Storage {
            code: ErrorCode::E006Storage.as_str(),
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn parquet(direction: &'static str, path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parquet {
            code: ErrorCode::E006Storage.as_str(),
            direction,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(path: impl Into<String>, what: &'static str, reason: impl ToString) -> Self {
        Self::Corrupt {
            code: ErrorCode::E006Storage.as_str(),
            path: path.into(),
            what,
            reason: reason.to_string(),
        }
    }

    pub fn incomplete_manifest(run_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::IncompleteManifest {
            code: ErrorCode::E007Internal.as_str(),
            run_id: run_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E001Configuration.as_str(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Storage { .. } | Self::Parquet { .. } | Self::Corrupt { .. } => {
                ErrorCode::E006Storage
            }
            Self::IncompleteManifest { .. } => ErrorCode::E007Internal,
            Self::InvalidConfig { .. } => ErrorCode::E001Configuration,
            Self::Serialization(_) => ErrorCode::E003Serialization,
        }
    }

    /// Only transient backend failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { source, .. } if source.is_temporary())
    }
}

impl From<WriterError> for PipelineError {
    fn from(err: WriterError) -> Self {
        match err {
            WriterError::Serialization(e) => PipelineError::Serialization(e),
            WriterError::InvalidConfig { message, .. } => PipelineError::Configuration(message),
            err @ WriterError::IncompleteManifest { .. } => PipelineError::Internal(strip_code(&err.to_string()).to_string()),
            other => PipelineError::Storage(strip_code(&other.to_string()).to_string()),
        }
    }
}

/// Result type alias for WriterError
pub type Result<T> = std::result::Result<T, WriterError>;

#[cfg(test)]
mod tests {
    use opendal::ErrorKind;

    use super::*;

    #[test]
    fn storage_errors_carry_code_and_path() {
        let err = WriterError::storage(
            "write",
            "staging/bronze/x.json",
            opendal::Error::new(ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("[E006]"), "got {msg}");
        assert!(msg.contains("staging/bronze/x.json"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn temporary_failures_are_retryable() {
        let err = WriterError::storage(
            "write",
            "p",
            opendal::Error::new(ErrorKind::Unexpected, "reset").set_temporary(),
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn converts_into_pipeline_error_by_kind() {
        let storage: PipelineError = WriterError::corrupt("p", "manifest", "eof").into();
        assert_eq!(storage.code(), ErrorCode::E006Storage);

        let config: PipelineError = WriterError::invalid_config("bucket missing").into();
        assert_eq!(config.code(), ErrorCode::E001Configuration);
    }
}
