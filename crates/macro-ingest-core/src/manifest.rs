//! Run manifests and idempotency keys.
//!
//! A manifest describes one stage attempt for one `(source, dataset)` pair.
//! It is built once, optionally enriched through the `with_*` builders (each
//! returning a new value), and then written next to the data it describes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, SerializationError};

/// Request parameters as sent upstream. Keys are unique and iterate in
/// sorted order, so the recorded form is reproducible.
pub type RequestParams = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extract" => Ok(Self::Extract),
            "transform" => Ok(Self::Transform),
            "load" => Ok(Self::Load),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub stage: Stage,
    pub source: String,
    pub dataset: String,
    pub extracted_at_utc: String,
    pub request_params: RequestParams,
    pub row_count: Option<u64>,
    pub payload_hash: Option<String>,
    pub output_partitions: Option<Vec<String>>,
    /// Hash of the manifest this one was derived from (bronze for transform,
    /// gold for load).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
}

impl RunManifest {
    pub fn new(
        run_id: impl Into<String>,
        stage: Stage,
        source: impl Into<String>,
        dataset: impl Into<String>,
        extracted_at_utc: impl Into<String>,
        request_params: RequestParams,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage,
            source: source.into(),
            dataset: dataset.into(),
            extracted_at_utc: extracted_at_utc.into(),
            request_params,
            row_count: None,
            payload_hash: None,
            output_partitions: None,
            parent_hash: None,
        }
    }

    pub fn with_row_count(&self, row_count: u64) -> Self {
        Self {
            row_count: Some(row_count),
            ..self.clone()
        }
    }

    pub fn with_payload_hash(&self, hash: impl Into<String>) -> Self {
        Self {
            payload_hash: Some(hash.into()),
            ..self.clone()
        }
    }

    pub fn with_output_partitions(&self, partitions: Vec<String>) -> Self {
        Self {
            output_partitions: Some(partitions),
            ..self.clone()
        }
    }

    pub fn with_parent_hash(&self, hash: impl Into<String>) -> Self {
        Self {
            parent_hash: Some(hash.into()),
            ..self.clone()
        }
    }

    /// A copy of this manifest re-targeted at another run and stage.
    ///
    /// Counts, hash and partitions are cleared; capture time and request
    /// parameters are carried so derived outputs partition like their input.
    pub fn derive(&self, run_id: impl Into<String>, stage: Stage) -> Self {
        Self::new(
            run_id,
            stage,
            self.source.clone(),
            self.dataset.clone(),
            self.extracted_at_utc.clone(),
            self.request_params.clone(),
        )
    }

    /// UTC calendar date of capture.
    pub fn extract_date(&self) -> Result<NaiveDate, PipelineError> {
        DateTime::parse_from_rfc3339(&self.extracted_at_utc)
            .map(|ts| ts.naive_utc().date())
            .map_err(|e| {
                PipelineError::Internal(format!(
                    "manifest {} has invalid extracted_at_utc '{}': {e}",
                    self.run_id, self.extracted_at_utc
                ))
            })
    }

    /// Fails until the payload hash is known.
    pub fn idempotency_key(&self) -> Result<IdempotencyKey, PipelineError> {
        let payload_hash = self.payload_hash.clone().ok_or_else(|| {
            PipelineError::Internal(format!("manifest {} has no payload hash yet", self.run_id))
        })?;
        Ok(IdempotencyKey {
            source: self.source.clone(),
            dataset: self.dataset.clone(),
            extract_date: self.extract_date()?,
            payload_hash,
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec_pretty(self).map_err(|e| SerializationError::Custom(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::Custom(e.to_string()))
    }
}

/// Identity of a stored raw payload. Equal keys mean the write is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub source: String,
    pub dataset: String,
    pub extract_date: NaiveDate,
    pub payload_hash: String,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.source,
            self.dataset,
            self.extract_date.format("%Y-%m-%d"),
            self.payload_hash
        )
    }
}
