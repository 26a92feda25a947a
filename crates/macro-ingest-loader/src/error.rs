use macro_ingest_core::{strip_code, ErrorCode, PipelineError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("[{code}] Failed to connect to the serving store: {reason}")]
    Connection { code: &'static str, reason: String },

    #[error("[{code}] {operation} on {table} failed: {reason}")]
    Query {
        code: &'static str,
        operation: &'static str,
        table: String,
        reason: String,
    },

    /// The frame cannot be loaded into the table as given
    #[error("[{code}] Frame rejected for {table}: {reason}")]
    InvalidFrame {
        code: &'static str,
        table: String,
        reason: String,
    },

    #[error("[{code}] Stored run record '{run_id}' is malformed: {reason}")]
    CorruptRecord {
        code: &'static str,
        run_id: String,
        reason: String,
    },

    #[error("[{code}] Serving store lock poisoned")]
    LockPoisoned { code: &'static str },

    #[error("[{code}] Serving store task failed: {reason}")]
    TaskFailed { code: &'static str, reason: String },

    #[error("[{code}] Invalid serving configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },
}

impl LoadError {
    pub fn connection(reason: impl ToString) -> Self {
        Self::Connection {
            code: ErrorCode::E005Load.as_str(),
            reason: reason.to_string(),
        }
    }

    pub fn query(operation: &'static str, table: impl Into<String>, reason: impl ToString) -> Self {
        Self::Query {
            code: ErrorCode::E005Load.as_str(),
            operation,
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_frame(table: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidFrame {
            code: ErrorCode::E005Load.as_str(),
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub fn corrupt_record(run_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptRecord {
            code: ErrorCode::E005Load.as_str(),
            run_id: run_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn lock_poisoned() -> Self {
        Self::LockPoisoned {
            code: ErrorCode::E005Load.as_str(),
        }
    }

    pub fn task_failed(reason: impl ToString) -> Self {
        Self::TaskFailed {
            code: ErrorCode::E005Load.as_str(),
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
            Self::InvalidConfig { .. } => ErrorCode::E001Configuration,
            _ => ErrorCode::E005Load,
        }
    }
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::InvalidConfig { message, .. } => PipelineError::Configuration(message),
            other => PipelineError::Load(strip_code(&other.to_string()).to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;
