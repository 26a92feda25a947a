//! SQL text for both serving backends.

use arrow::datatypes::DataType;
use pg_escape::quote_identifier;

use crate::frame::TableSpec;

/// Map Arrow data types to PostgreSQL column types.
pub(crate) fn pg_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Int32 => "INTEGER",
        DataType::Int64 => "BIGINT",
        DataType::Float64 => "DOUBLE PRECISION",
        DataType::Boolean => "BOOLEAN",
        _ => "TEXT",
    }
}

/// Map Arrow data types to SQLite storage classes.
pub(crate) fn sqlite_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Int32 | DataType::Int64 | DataType::Boolean => "INTEGER",
        DataType::Float64 => "REAL",
        _ => "TEXT",
    }
}

/// `"schema"."table"`, quoted only where PostgreSQL requires it.
pub(crate) fn pg_qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// SQLite has no schemas; the schema becomes a table name prefix.
pub(crate) fn sqlite_table_name(schema: &str, table: &str) -> String {
    format!("{schema}_{table}")
}

pub(crate) fn sqlite_quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn create_table(
    qualified: &str,
    spec: &TableSpec,
    quote: impl Fn(&str) -> String,
    ty: fn(&DataType) -> &'static str,
) -> String {
    let mut parts: Vec<String> = spec
        .columns
        .iter()
        .map(|c| {
            let not_null = if c.nullable && !spec.is_key(&c.name) { "" } else { " NOT NULL" };
            format!("{} {}{}", quote(c.name.as_str()), ty(&c.data_type), not_null)
        })
        .collect();
    parts.push(format!(
        "PRIMARY KEY ({})",
        spec.primary_key.iter().map(|k| quote(k.as_str())).collect::<Vec<_>>().join(", ")
    ));
    format!("CREATE TABLE IF NOT EXISTS {} ({})", qualified, parts.join(", "))
}

pub(crate) fn pg_create_table(qualified: &str, spec: &TableSpec) -> String {
    create_table(qualified, spec, |c| quote_identifier(c).into_owned(), pg_type)
}

pub(crate) fn sqlite_create_table(table: &str, spec: &TableSpec) -> String {
    create_table(&sqlite_quote(table), spec, sqlite_quote, sqlite_type)
}

/// Upsert one row; returns a single `inserted` boolean only when the row was
/// written (inserted, or updated because a non-key column changed).
pub(crate) fn pg_upsert(qualified: &str, spec: &TableSpec) -> String {
    let columns: Vec<String> = spec
        .columns
        .iter()
        .map(|c| quote_identifier(&c.name).into_owned())
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    let keys: Vec<String> = spec
        .primary_key
        .iter()
        .map(|k| quote_identifier(k).into_owned())
        .collect();
    let values: Vec<String> = spec
        .value_columns()
        .map(|c| quote_identifier(&c.name).into_owned())
        .collect();

    let conflict = if values.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let set = values
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let current = values.iter().map(|c| format!("t.{c}")).collect::<Vec<_>>().join(", ");
        let incoming = values
            .iter()
            .map(|c| format!("EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {set} WHERE ({current}) IS DISTINCT FROM ({incoming})")
    };

    format!(
        "INSERT INTO {qualified} AS t ({}) VALUES ({}) ON CONFLICT ({}) {conflict} RETURNING (xmax = 0) AS inserted",
        columns.join(", "),
        placeholders.join(", "),
        keys.join(", ")
    )
}

/// `SELECT 1 ... WHERE key = ?` over the key columns, in key order.
pub(crate) fn sqlite_exists(table: &str, spec: &TableSpec) -> String {
    let predicate = spec
        .primary_key
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", sqlite_quote(k), i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("SELECT 1 FROM {} WHERE {predicate}", sqlite_quote(table))
}

/// Upsert one row; `changes()` is 0 when the stored row already matched.
pub(crate) fn sqlite_upsert(table: &str, spec: &TableSpec) -> String {
    let quoted_table = sqlite_quote(table);
    let columns: Vec<String> = spec.columns.iter().map(|c| sqlite_quote(&c.name)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let keys: Vec<String> = spec.primary_key.iter().map(|k| sqlite_quote(k)).collect();
    let values: Vec<String> = spec.value_columns().map(|c| sqlite_quote(&c.name)).collect();

    let conflict = if values.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let set = values
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let changed = values
            .iter()
            .map(|c| format!("{quoted_table}.{c} IS NOT excluded.{c}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        format!("DO UPDATE SET {set} WHERE {changed}")
    };

    format!(
        "INSERT INTO {quoted_table} ({}) VALUES ({}) ON CONFLICT ({}) {conflict}",
        columns.join(", "),
        placeholders.join(", "),
        keys.join(", ")
    )
}
