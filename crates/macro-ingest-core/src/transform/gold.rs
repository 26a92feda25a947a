use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;

use crate::bea::BeaQuery;
use crate::error::TransformError;
use crate::manifest::RequestParams;
use crate::schema::{gold_schema, silver, silver_schema};

/// Values that are known to the frame but not to the silver rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldContext {
    pub table_name: String,
    pub frequency: String,
}

impl GoldContext {
    pub fn from_query(query: &BeaQuery) -> Self {
        Self {
            table_name: query.table_name.clone(),
            frequency: query.frequency.clone(),
        }
    }

    /// Rebuild the context from recorded request parameters.
    pub fn from_request_params(params: &RequestParams) -> Result<Self, TransformError> {
        let lookup = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    TransformError::MalformedPayload(format!("request params lack {key}"))
                })
        };
        Ok(Self {
            table_name: lookup("TableName")?,
            frequency: lookup("Frequency")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GoldRow {
    line_code: i32,
    geo_fips: String,
    period: String,
    geo_name: String,
    year: i32,
    unit: Option<String>,
    unit_mult: Option<i32>,
    value: Option<f64>,
    note_ref: Option<String>,
}

impl GoldRow {
    fn key(&self) -> (i32, &str, &str) {
        (self.line_code, &self.geo_fips, &self.period)
    }
}

/// Type, key and sort a silver frame.
///
/// Rows come out ordered by `(table_name, line_code, geo_fips, period)`.
/// Two silver rows mapping to the same key fail the transform.
pub fn to_gold_frame(silver_frame: &RecordBatch, ctx: &GoldContext) -> Result<RecordBatch, TransformError> {
    silver_schema().validate(silver_frame)?;

    let text = |name: &str| -> Result<_, TransformError> {
        let idx = silver_frame.schema().index_of(name)?;
        Ok(silver_frame.column(idx).as_string::<i32>().clone())
    };
    let code = text(silver::CODE)?;
    let geo_fips = text(silver::GEO_FIPS)?;
    let geo_name = text(silver::GEO_NAME)?;
    let time_period = text(silver::TIME_PERIOD)?;
    let cl_unit = text(silver::CL_UNIT)?;
    let unit_mult = text(silver::UNIT_MULT)?;
    let data_value = text(silver::DATA_VALUE)?;
    let note_ref = text(silver::NOTE_REF)?;

    let optional = |array: &StringArray, row: usize| {
        (!array.is_null(row))
            .then(|| array.value(row).trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut rows = Vec::with_capacity(silver_frame.num_rows());
    for row in 0..silver_frame.num_rows() {
        let period = time_period.value(row).trim().to_string();
        rows.push(GoldRow {
            line_code: parse_line_code(code.value(row), row)?,
            geo_fips: geo_fips.value(row).trim().to_string(),
            year: parse_year(&period, row)?,
            period,
            geo_name: geo_name.value(row).trim().to_string(),
            unit: optional(&cl_unit, row),
            unit_mult: optional(&unit_mult, row)
                .map(|m| {
                    m.parse::<i32>().map_err(|_| TransformError::InvalidValue {
                        row,
                        field: "unit_mult",
                        value: m.clone(),
                    })
                })
                .transpose()?,
            value: parse_data_value(data_value.value(row), row)?,
            note_ref: optional(&note_ref, row),
        });
    }

    // table_name is constant within one frame, so sorting on the rest is enough
    rows.sort_by(|a, b| a.key().cmp(&b.key()));
    if let Some(pair) = rows.windows(2).find(|w| w[0].key() == w[1].key()) {
        let dup = &pair[0];
        return Err(TransformError::DuplicateKey {
            table: gold_schema().name().to_string(),
            key: format!(
                "table_name={}, line_code={}, geo_fips={}, period={}",
                ctx.table_name, dup.line_code, dup.geo_fips, dup.period
            ),
        });
    }

    let batch = build_batch(&rows, ctx)?;
    gold_schema().validate(&batch)?;
    Ok(batch)
}

fn build_batch(rows: &[GoldRow], ctx: &GoldContext) -> Result<RecordBatch, TransformError> {
    let n = rows.len();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![ctx.table_name.as_str(); n])),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.line_code))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.geo_fips))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.period))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.geo_name))),
        Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.year))),
        Arc::new(StringArray::from(vec![ctx.frequency.as_str(); n])),
        Arc::new(StringArray::from_iter(rows.iter().map(|r| r.unit.as_deref()))),
        Arc::new(Int32Array::from_iter(rows.iter().map(|r| r.unit_mult))),
        Arc::new(Float64Array::from_iter(rows.iter().map(|r| r.value))),
        Arc::new(StringArray::from_iter(rows.iter().map(|r| r.note_ref.as_deref()))),
    ];
    Ok(RecordBatch::try_new(gold_schema().schema(), columns)?)
}

/// `SQPCE-1` -> 1. A bare number is accepted as is.
fn parse_line_code(code: &str, row: usize) -> Result<i32, TransformError> {
    let code = code.trim();
    let tail = code.rsplit('-').next().unwrap_or(code);
    tail.parse().map_err(|_| TransformError::InvalidValue {
        row,
        field: "code",
        value: code.to_string(),
    })
}

/// Leading four digits of `2023`, `2023Q1`, `2023M07`.
fn parse_year(period: &str, row: usize) -> Result<i32, TransformError> {
    period
        .get(..4)
        .filter(|y| y.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|y| y.parse().ok())
        .ok_or_else(|| TransformError::InvalidValue {
            row,
            field: "time_period",
            value: period.to_string(),
        })
}

/// Parenthesized markers such as `(NA)` or `(D)` mean no published value.
fn parse_data_value(raw: &str, row: usize) -> Result<Option<f64>, TransformError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || (trimmed.starts_with('(') && trimmed.ends_with(')')) {
        return Ok(None);
    }
    let invalid = || TransformError::InvalidValue {
        row,
        field: "data_value",
        value: raw.to_string(),
    };
    let value: f64 = trimmed.replace(',', "").parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(invalid());
    }
    Ok(Some(value))
}
