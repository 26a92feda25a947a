//! Content hashing for payloads and frames.

use std::collections::BTreeMap;

use arrow::array::{Array, AsArray};
use arrow::record_batch::RecordBatch;
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int64Type};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalValue;
use crate::error::SerializationError;

/// Length of the hash prefix used in object names.
pub const SHORT_HASH_LEN: usize = 16;

/// SHA-256 hex digest of an already canonical value.
pub fn hash_canonical(value: &CanonicalValue) -> String {
    let encoded = value.to_canonical_string();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

/// Deterministic content hash of any serializable payload.
///
/// Key order and whitespace never influence the digest. NaN, infinities and
/// non-scalar map keys are rejected.
pub fn stable_payload_hash<T: Serialize + ?Sized>(payload: &T) -> Result<String, SerializationError> {
    let canonical = CanonicalValue::from_serialize(payload)?;
    Ok(hash_canonical(&canonical))
}

/// Current wall-clock time, RFC 3339 in UTC with an explicit `+00:00` offset.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn short_hash(hash: &str) -> &str {
    match hash.char_indices().nth(SHORT_HASH_LEN) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}

/// Canonical hash over the rows of a frame.
///
/// The frame is read as a sequence of `column -> value` mappings, so two
/// frames with the same rows in the same order hash equally regardless of
/// column order or chunking.
pub fn frame_fingerprint(batch: &RecordBatch) -> Result<String, SerializationError> {
    let rows = frame_rows(batch)?;
    Ok(hash_canonical(&CanonicalValue::Sequence(rows)))
}

fn frame_rows(batch: &RecordBatch) -> Result<Vec<CanonicalValue>, SerializationError> {
    let schema = batch.schema();
    let mut rows: Vec<BTreeMap<String, CanonicalValue>> = vec![BTreeMap::new(); batch.num_rows()];

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        for (row_idx, row) in rows.iter_mut().enumerate() {
            let value = cell_value(field.name(), column.as_ref(), row_idx)?;
            row.insert(field.name().clone(), value);
        }
    }

    Ok(rows.into_iter().map(CanonicalValue::Mapping).collect())
}

fn cell_value(name: &str, column: &dyn Array, idx: usize) -> Result<CanonicalValue, SerializationError> {
    if column.is_null(idx) {
        return Ok(CanonicalValue::Null);
    }
    let value = match column.data_type() {
        DataType::Utf8 => CanonicalValue::from(column.as_string::<i32>().value(idx)),
        DataType::Int32 => CanonicalValue::from(column.as_primitive::<Int32Type>().value(idx)),
        DataType::Int64 => CanonicalValue::from(column.as_primitive::<Int64Type>().value(idx)),
        DataType::Float64 => CanonicalValue::float(column.as_primitive::<Float64Type>().value(idx))?,
        DataType::Boolean => CanonicalValue::from(column.as_boolean().value(idx)),
        other => {
            return Err(SerializationError::UnsupportedColumn {
                column: name.to_string(),
                data_type: other.to_string(),
            })
        }
    };
    Ok(value)
}
