//! Frame decoding for the upsert paths.
//!
//! A gold frame is turned into a [`TableSpec`] (column names, types, key) and
//! a list of rows of typed [`SqlValue`]s, sorted by primary key so that
//! concurrent loads touch rows in the same order.

use arrow::array::{Array, AsArray};
use arrow::compute::{lexsort_to_indices, SortColumn};
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int64Type};
use arrow::record_batch::RecordBatch;
use rusqlite::types::ToSqlOutput;
use tokio_postgres::types::ToSql;

use crate::error::{LoadError, Result};

/// Typed bind parameter, usable with both backends.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int32(Option<i32>),
    Int64(Option<i64>),
    Float64(Option<f64>),
    Boolean(Option<bool>),
    Text(Option<String>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            Self::Int32(v) => v.is_none(),
            Self::Int64(v) => v.is_none(),
            Self::Float64(v) => v.is_none(),
            Self::Boolean(v) => v.is_none(),
            Self::Text(v) => v.is_none(),
        }
    }

    pub(crate) fn as_pg(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int32(v) => v,
            Self::Int64(v) => v,
            Self::Float64(v) => v,
            Self::Boolean(v) => v,
            Self::Text(v) => v,
        }
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Int32(v) => rusqlite::ToSql::to_sql(v),
            Self::Int64(v) => rusqlite::ToSql::to_sql(v),
            Self::Float64(v) => rusqlite::ToSql::to_sql(v),
            Self::Boolean(v) => rusqlite::ToSql::to_sql(v),
            Self::Text(v) => rusqlite::ToSql::to_sql(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

/// Shape of a serving table, derived from the frame being loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
}

impl TableSpec {
    pub fn from_frame(name: &str, frame: &RecordBatch, pk_cols: &[&str]) -> Result<Self> {
        if pk_cols.is_empty() {
            return Err(LoadError::invalid_frame(name, "primary key must name at least one column"));
        }

        let schema = frame.schema();
        let mut columns = Vec::with_capacity(schema.fields().len());
        for field in schema.fields() {
            if !is_supported(field.data_type()) {
                return Err(LoadError::invalid_frame(
                    name,
                    format!("column '{}' has unsupported type {}", field.name(), field.data_type()),
                ));
            }
            if columns.iter().any(|c: &ColumnSpec| c.name == *field.name()) {
                return Err(LoadError::invalid_frame(name, format!("duplicate column '{}'", field.name())));
            }
            columns.push(ColumnSpec {
                name: field.name().clone(),
                data_type: field.data_type().clone(),
                nullable: field.is_nullable(),
            });
        }

        let mut primary_key = Vec::with_capacity(pk_cols.len());
        for pk in pk_cols {
            if !columns.iter().any(|c| c.name == *pk) {
                return Err(LoadError::invalid_frame(name, format!("key column '{pk}' is not in the frame")));
            }
            if primary_key.iter().any(|k: &String| k == pk) {
                return Err(LoadError::invalid_frame(name, format!("key column '{pk}' listed twice")));
            }
            primary_key.push(pk.to_string());
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            primary_key,
        })
    }

    pub fn is_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|k| k == column)
    }

    pub fn key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c.name == *k))
            .collect()
    }

    /// Columns updated on conflict.
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !self.is_key(&c.name))
    }
}

fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32 | DataType::Int64 | DataType::Float64 | DataType::Boolean | DataType::Utf8
    )
}

/// Rows of `frame` in primary-key order. Null or repeated keys are rejected.
pub fn sorted_rows(spec: &TableSpec, frame: &RecordBatch) -> Result<Vec<Vec<SqlValue>>> {
    let key_indices = spec.key_indices();

    let sort_columns: Vec<SortColumn> = key_indices
        .iter()
        .map(|&idx| SortColumn {
            values: frame.column(idx).clone(),
            options: None,
        })
        .collect();
    let order = lexsort_to_indices(&sort_columns, None)
        .map_err(|e| LoadError::invalid_frame(&spec.name, e))?;

    let mut rows: Vec<Vec<SqlValue>> = Vec::with_capacity(frame.num_rows());
    for row_idx in order.values().iter().map(|&i| i as usize) {
        let row = frame
            .columns()
            .iter()
            .map(|column| cell(column.as_ref(), row_idx))
            .collect::<Vec<_>>();

        if let Some(&k) = key_indices.iter().find(|&&k| row[k].is_null()) {
            return Err(LoadError::invalid_frame(
                &spec.name,
                format!("null in key column '{}'", spec.columns[k].name),
            ));
        }
        if let Some(prev) = rows.last() {
            if key_indices.iter().all(|&k| prev[k] == row[k]) {
                return Err(LoadError::invalid_frame(
                    &spec.name,
                    format!("duplicate primary key {:?}", key_values(&key_indices, &row)),
                ));
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

pub(crate) fn key_values<'a>(key_indices: &[usize], row: &'a [SqlValue]) -> Vec<&'a SqlValue> {
    key_indices.iter().map(|&k| &row[k]).collect()
}

fn cell(column: &dyn Array, idx: usize) -> SqlValue {
    let null = column.is_null(idx);
    match column.data_type() {
        DataType::Int32 => SqlValue::Int32((!null).then(|| column.as_primitive::<Int32Type>().value(idx))),
        DataType::Int64 => SqlValue::Int64((!null).then(|| column.as_primitive::<Int64Type>().value(idx))),
        DataType::Float64 => {
            SqlValue::Float64((!null).then(|| column.as_primitive::<Float64Type>().value(idx)))
        }
        DataType::Boolean => SqlValue::Boolean((!null).then(|| column.as_boolean().value(idx))),
        // TableSpec::from_frame admits nothing else
        _ => SqlValue::Text((!null).then(|| column.as_string::<i32>().value(idx).to_string())),
    }
}
