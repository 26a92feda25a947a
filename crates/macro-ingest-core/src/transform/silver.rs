use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::record_batch::RecordBatch;
use serde_json::Value;

use crate::bea::{data_rows, scalar_text};
use crate::error::TransformError;
use crate::schema::silver_schema;

// (upstream key, required)
const SOURCE_FIELDS: [(&str, bool); 8] = [
    ("Code", true),
    ("GeoFips", true),
    ("GeoName", true),
    ("TimePeriod", true),
    ("CL_UNIT", false),
    ("UNIT_MULT", false),
    ("DataValue", true),
    ("NoteRef", false),
];

/// Flatten `BEAAPI.Results.Data` into the silver frame.
///
/// Values are kept as text exactly as delivered (numbers are rendered with
/// their JSON spelling). A missing required field fails the whole payload.
pub fn from_bea_payload(payload: &Value) -> Result<RecordBatch, TransformError> {
    let rows = data_rows(payload).ok_or_else(|| {
        TransformError::MalformedPayload("BEAAPI.Results.Data is missing or not an array".into())
    })?;

    let mut columns: Vec<Vec<Option<String>>> =
        vec![Vec::with_capacity(rows.len()); SOURCE_FIELDS.len()];

    for (row_idx, row) in rows.iter().enumerate() {
        let object = row.as_object().ok_or_else(|| {
            TransformError::MalformedPayload(format!("row {row_idx} is not an object"))
        })?;
        for (col_idx, (key, required)) in SOURCE_FIELDS.iter().enumerate() {
            let value = object
                .get(*key)
                .filter(|v| !v.is_null())
                .map(scalar_text);
            if *required && value.is_none() {
                return Err(TransformError::MalformedPayload(format!(
                    "row {row_idx} is missing {key}"
                )));
            }
            columns[col_idx].push(value);
        }
    }

    let table = silver_schema();
    let arrays: Vec<ArrayRef> = columns
        .into_iter()
        .map(|values| Arc::new(StringArray::from(values)) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(table.schema(), arrays)?;
    table.validate(&batch)?;
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, AsArray};
    use serde_json::json;

    use super::*;
    use crate::schema::silver;

    fn payload(rows: Value) -> Value {
        json!({"BEAAPI": {"Results": {"Data": rows}}})
    }

    #[test]
    fn flattens_rows_as_text() {
        let batch = from_bea_payload(&payload(json!([
            {"Code": "SQPCE-1", "GeoFips": "01000", "GeoName": "Alabama", "TimePeriod": "2023",
             "CL_UNIT": "Millions of current dollars", "UNIT_MULT": 6, "DataValue": "190,123.4"},
            {"Code": "SQPCE-1", "GeoFips": "02000", "GeoName": "Alaska", "TimePeriod": "2023",
             "CL_UNIT": "Millions of current dollars", "UNIT_MULT": "6", "DataValue": "(NA)", "NoteRef": "*"}
        ])))
        .unwrap();

        assert_eq!(batch.num_rows(), 2);
        let schema = batch.schema();
        let mult = batch.column(schema.index_of(silver::UNIT_MULT).unwrap()).as_string::<i32>();
        assert_eq!(mult.value(0), "6");
        assert_eq!(mult.value(1), "6");
        let note = batch.column(schema.index_of(silver::NOTE_REF).unwrap());
        assert!(note.is_null(0));
        assert!(!note.is_null(1));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = from_bea_payload(&payload(json!([
            {"Code": "SQPCE-1", "GeoFips": "01000", "GeoName": "Alabama", "DataValue": "1"}
        ])))
        .unwrap_err();
        assert!(err.to_string().contains("TimePeriod"), "got {err}");
    }

    #[test]
    fn missing_envelope_is_an_error() {
        assert!(matches!(
            from_bea_payload(&json!({"BEAAPI": {}})),
            Err(TransformError::MalformedPayload(_))
        ));
    }

    #[test]
    fn duplicate_rows_are_rejected() {
        let row = json!({"Code": "SQPCE-1", "GeoFips": "01000", "GeoName": "Alabama",
                         "TimePeriod": "2023", "DataValue": "1"});
        assert!(matches!(
            from_bea_payload(&payload(json!([row.clone(), row]))),
            Err(TransformError::DuplicateKey { .. })
        ));
    }
}
