//! Declared table shapes.
//!
//! Every frame the transformer produces is checked against one of these
//! before it leaves the crate. Validation never coerces: a wrong name, type
//! or null is an error.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::Array;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

use crate::error::TransformError;

pub mod gold;
pub mod silver;

pub use gold::gold_schema;
pub use silver::silver_schema;

/// Arrow schema plus primary key.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: &'static str,
    schema: SchemaRef,
    primary_key: &'static [&'static str],
}

impl TableSchema {
    pub fn new(name: &'static str, fields: Vec<Field>, primary_key: &'static [&'static str]) -> Self {
        Self {
            name,
            schema: Arc::new(Schema::new(fields)),
            primary_key,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn primary_key(&self) -> &'static [&'static str] {
        self.primary_key
    }

    /// Column positions of the primary key, in key order.
    pub fn key_indices(&self) -> Result<Vec<usize>, TransformError> {
        self.primary_key
            .iter()
            .map(|column| {
                self.schema
                    .index_of(column)
                    .map_err(|_| TransformError::UnknownKeyColumn {
                        table: self.name.to_string(),
                        column: column.to_string(),
                    })
            })
            .collect()
    }

    /// Check names, order, types, nullability and key uniqueness.
    pub fn validate(&self, batch: &RecordBatch) -> Result<(), TransformError> {
        let expected = self.schema.fields();
        let found = batch.schema();
        let found = found.fields();

        if expected.len() != found.len() {
            return Err(TransformError::ColumnCount {
                table: self.name.to_string(),
                expected: expected.len(),
                found: found.len(),
            });
        }

        for (index, (want, got)) in expected.iter().zip(found.iter()).enumerate() {
            if want.name() != got.name() {
                return Err(TransformError::ColumnName {
                    table: self.name.to_string(),
                    index,
                    expected: want.name().clone(),
                    found: got.name().clone(),
                });
            }
            if want.data_type() != got.data_type() {
                return Err(TransformError::ColumnType {
                    table: self.name.to_string(),
                    column: want.name().clone(),
                    expected: want.data_type().to_string(),
                    found: got.data_type().to_string(),
                });
            }
            let nulls = batch.column(index).null_count();
            if !want.is_nullable() && nulls > 0 {
                return Err(TransformError::UnexpectedNull {
                    table: self.name.to_string(),
                    column: want.name().clone(),
                    nulls,
                });
            }
        }

        self.check_unique_keys(batch)
    }

    fn check_unique_keys(&self, batch: &RecordBatch) -> Result<(), TransformError> {
        let indices = self.key_indices()?;
        if indices.is_empty() {
            return Ok(());
        }
        let mut seen = HashSet::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let key = render_key(batch, &indices, row)?;
            if !seen.insert(key.clone()) {
                return Err(TransformError::DuplicateKey {
                    table: self.name.to_string(),
                    key,
                });
            }
        }
        Ok(())
    }
}

/// `col=value` pairs joined with `, `; used in error messages and for
/// uniqueness checks.
pub(crate) fn render_key(
    batch: &RecordBatch,
    indices: &[usize],
    row: usize,
) -> Result<String, TransformError> {
    let schema = batch.schema();
    let mut parts = Vec::with_capacity(indices.len());
    for &idx in indices {
        let column = batch.column(idx);
        let value = if column.is_null(row) {
            "null".to_string()
        } else {
            array_value_to_string(column.as_ref(), row)?
        };
        parts.push(format!("{}={}", schema.field(idx).name(), value));
    }
    Ok(parts.join(", "))
}

/// Shorthand for building declared fields.
pub(crate) fn column(name: &str, data_type: DataType, nullable: bool) -> Field {
    Field::new(name, data_type, nullable)
}
