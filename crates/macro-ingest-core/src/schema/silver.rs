use std::sync::OnceLock;

use arrow::datatypes::DataType;

use super::{column, TableSchema};

pub const CODE: &str = "code";
pub const GEO_FIPS: &str = "geo_fips";
pub const GEO_NAME: &str = "geo_name";
pub const TIME_PERIOD: &str = "time_period";
pub const CL_UNIT: &str = "cl_unit";
pub const UNIT_MULT: &str = "unit_mult";
pub const DATA_VALUE: &str = "data_value";
pub const NOTE_REF: &str = "note_ref";

const PRIMARY_KEY: &[&str] = &[CODE, GEO_FIPS, TIME_PERIOD];

/// Flattened BEA rows, every column kept as the upstream text.
pub fn silver_schema() -> &'static TableSchema {
    static SCHEMA: OnceLock<TableSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        TableSchema::new(
            "silver",
            vec![
                column(CODE, DataType::Utf8, false),
                column(GEO_FIPS, DataType::Utf8, false),
                column(GEO_NAME, DataType::Utf8, false),
                column(TIME_PERIOD, DataType::Utf8, false),
                column(CL_UNIT, DataType::Utf8, true),
                column(UNIT_MULT, DataType::Utf8, true),
                column(DATA_VALUE, DataType::Utf8, false),
                column(NOTE_REF, DataType::Utf8, true),
            ],
            PRIMARY_KEY,
        )
    })
}
