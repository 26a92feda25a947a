use std::sync::OnceLock;

use arrow::datatypes::DataType;

use super::{column, TableSchema};

pub const TABLE_NAME: &str = "table_name";
pub const LINE_CODE: &str = "line_code";
pub const GEO_FIPS: &str = "geo_fips";
pub const PERIOD: &str = "period";
pub const GEO_NAME: &str = "geo_name";
pub const YEAR: &str = "year";
pub const FREQUENCY: &str = "frequency";
pub const UNIT: &str = "unit";
pub const UNIT_MULT: &str = "unit_mult";
pub const VALUE: &str = "value";
pub const NOTE_REF: &str = "note_ref";

pub const PRIMARY_KEY: &[&str] = &[TABLE_NAME, LINE_CODE, GEO_FIPS, PERIOD];

/// Typed, keyed observations ready for the serving store.
///
/// `value` is null when BEA suppresses or does not publish the figure.
pub fn gold_schema() -> &'static TableSchema {
    static SCHEMA: OnceLock<TableSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        TableSchema::new(
            "gold",
            vec![
                column(TABLE_NAME, DataType::Utf8, false),
                column(LINE_CODE, DataType::Int32, false),
                column(GEO_FIPS, DataType::Utf8, false),
                column(PERIOD, DataType::Utf8, false),
                column(GEO_NAME, DataType::Utf8, false),
                column(YEAR, DataType::Int32, false),
                column(FREQUENCY, DataType::Utf8, false),
                column(UNIT, DataType::Utf8, true),
                column(UNIT_MULT, DataType::Int32, true),
                column(VALUE, DataType::Float64, true),
                column(NOTE_REF, DataType::Utf8, true),
            ],
            PRIMARY_KEY,
        )
    })
}
