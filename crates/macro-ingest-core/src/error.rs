//! Error kinds shared across the pipeline.
//!
//! Every kind carries a stable code (`E001`..`E007`) that shows up in log
//! lines, run records and the process exit status.

use std::fmt;

use arrow::error::ArrowError;
use thiserror::Error;

use crate::manifest::Stage;
use crate::run_state::TransitionError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Missing or invalid setting
    E001Configuration,
    /// E002: Upstream API failure
    E002Extraction,
    /// E003: Payload cannot be canonicalized
    E003Serialization,
    /// E004: Schema violation while transforming
    E004Transform,
    /// E005: Upsert or run-recording failure
    E005Load,
    /// E006: Object storage failure
    E006Storage,
    /// E007: Pipeline invariant broken
    E007Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001Configuration => "E001",
            Self::E002Extraction => "E002",
            Self::E003Serialization => "E003",
            Self::E004Transform => "E004",
            Self::E005Load => "E005",
            Self::E006Storage => "E006",
            Self::E007Internal => "E007",
        }
    }

    /// Name of the error kind as it appears in run records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::E001Configuration => "ConfigurationError",
            Self::E002Extraction => "ExtractionError",
            Self::E003Serialization => "SerializationError",
            Self::E004Transform => "TransformError",
            Self::E005Load => "LoadError",
            Self::E006Storage => "StorageError",
            Self::E007Internal => "InternalError",
        }
    }

    /// Process exit status used by the CLI boundary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::E001Configuration => 2,
            Self::E002Extraction => 3,
            Self::E003Serialization => 4,
            Self::E004Transform => 5,
            Self::E005Load => 6,
            Self::E006Storage => 7,
            Self::E007Internal => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload could not be turned into a [`CanonicalValue`](crate::CanonicalValue).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SerializationError {
    #[error("[E003] non-finite number {0} cannot be canonicalized")]
    NonFiniteNumber(f64),

    #[error("[E003] mapping keys must be strings or integers, got {0}")]
    UnsupportedKey(&'static str),

    #[error("[E003] column '{column}' has unsupported type {data_type}")]
    UnsupportedColumn { column: String, data_type: String },

    #[error("[E003] {0}")]
    Custom(String),
}

impl serde::ser::Error for SerializationError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Custom(msg.to_string())
    }
}

/// Raw or intermediate data does not fit the declared table shape.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("[E004] {table}: expected {expected} columns, found {found}")]
    ColumnCount {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("[E004] {table}: column {index} should be '{expected}', found '{found}'")]
    ColumnName {
        table: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[error("[E004] {table}.{column}: expected type {expected}, found {found}")]
    ColumnType {
        table: String,
        column: String,
        expected: String,
        found: String,
    },

    #[error("[E004] {table}.{column}: {nulls} null value(s) in non-nullable column")]
    UnexpectedNull {
        table: String,
        column: String,
        nulls: usize,
    },

    #[error("[E004] {table}: primary key column '{column}' is not declared")]
    UnknownKeyColumn { table: String, column: String },

    #[error("[E004] {table}: duplicate primary key ({key})")]
    DuplicateKey { table: String, key: String },

    #[error("[E004] malformed payload: {0}")]
    MalformedPayload(String),

    #[error("[E004] row {row}: invalid {field} value '{value}'")]
    InvalidValue {
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("[E004] arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Unified error for every pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[E001] configuration error: {0}")]
    Configuration(String),

    #[error("[E002] extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("[E005] load failed: {0}")]
    Load(String),

    #[error("[E006] storage operation failed: {0}")]
    Storage(String),

    #[error("[E007] {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::E001Configuration,
            Self::Extraction(_) => ErrorCode::E002Extraction,
            Self::Serialization(_) => ErrorCode::E003Serialization,
            Self::Transform(_) => ErrorCode::E004Transform,
            Self::Load(_) => ErrorCode::E005Load,
            Self::Storage(_) => ErrorCode::E006Storage,
            Self::Internal(_) => ErrorCode::E007Internal,
        }
    }
}

impl From<TransitionError> for PipelineError {
    fn from(err: TransitionError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// `message` without its leading `[Exxx] ` tag, for re-wrapping coded errors.
pub fn strip_code(message: &str) -> &str {
    match message.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((code, rest)) if code.len() == 4 && code.starts_with('E') => rest,
        _ => message,
    }
}

/// A [`PipelineError`] with the run and stage it happened in.
#[derive(Debug, Error)]
#[error("run {run_id} failed during {stage}: {error}")]
pub struct StageFailure {
    pub run_id: String,
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
}

impl StageFailure {
    pub fn new(run_id: impl Into<String>, stage: Stage, error: PipelineError) -> Self {
        Self {
            run_id: run_id.into(),
            stage,
            error,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }
}
