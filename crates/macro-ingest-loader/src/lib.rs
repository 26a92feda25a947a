//! Serving store for gold tables and run records
//!
//! [`ServingStore`] is implemented for PostgreSQL ([`PostgresStore`]) and for
//! SQLite ([`SqliteStore`], used for local runs and tests). Both apply the
//! same policy: rows are upserted in primary-key order inside one
//! transaction, and a stored row is only rewritten when a non-key column
//! differs.

mod error;
mod frame;
mod postgres;
mod sql;
mod sqlite;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use macro_ingest_config::{ServingBackend, ServingConfig};
use macro_ingest_core::RunStatus;
use serde::{Deserialize, Serialize};

pub use error::{LoadError, Result};
pub use frame::{sorted_rows, ColumnSpec, SqlValue, TableSpec};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Name of the run table inside the meta schema.
pub const RUNS_TABLE: &str = "pipeline_runs";

/// Row counts of one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
}

impl UpsertSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    pub(crate) fn count(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Inserted => self.inserted += 1,
            RowOutcome::Updated => self.updated += 1,
            RowOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Outcome of one run, keyed by `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub details: serde_json::Value,
}

/// A run record as read back, with the time it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    #[serde(flatten)]
    pub record: RunRecord,
    pub recorded_at: String,
}

#[async_trait]
pub trait ServingStore: Send + Sync {
    fn backend(&self) -> ServingBackend;

    /// Create the table if needed and upsert every row of `frame`, all or nothing.
    async fn upsert_gold_table(&self, table: &str, frame: &RecordBatch, pk_cols: &[&str]) -> Result<UpsertSummary>;

    /// Insert or replace the record for `record.run_id`.
    async fn record_run(&self, record: &RunRecord) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<Option<StoredRun>>;
}

/// Open the configured serving backend.
///
/// The PostgreSQL backend needs `PG_HOST` and `PG_USER`; both are checked
/// here rather than at config load so that stages that never load can run
/// without them.
pub async fn connect(config: &ServingConfig) -> Result<Box<dyn ServingStore>> {
    match config.backend() {
        ServingBackend::Postgres => Ok(Box::new(PostgresStore::connect(config).await?)),
        ServingBackend::Sqlite => Ok(Box::new(SqliteStore::open(config)?)),
    }
}

fn parse_status(run_id: &str, raw: &str) -> Result<RunStatus> {
    raw.parse().map_err(|e| LoadError::corrupt_record(run_id, e))
}
