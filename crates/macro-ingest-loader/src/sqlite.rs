//! SQLite serving store for local runs and tests.
//!
//! One connection behind a mutex; every call runs on the blocking pool.
//! SQLite has no schemas, so gold tables live at `{schema_gold}_{table}`
//! and run records at `{schema_meta}_pipeline_runs`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use macro_ingest_config::{ServingBackend, ServingConfig};
use macro_ingest_core::utc_now_iso;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{LoadError, Result};
use crate::frame::{key_values, sorted_rows, TableSpec};
use crate::sql::{sqlite_create_table, sqlite_exists, sqlite_quote, sqlite_table_name, sqlite_upsert};
use crate::{parse_status, RowOutcome, RunRecord, ServingStore, StoredRun, UpsertSummary, RUNS_TABLE};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    schema_gold: String,
    schema_meta: String,
}

impl SqliteStore {
    /// Open or create the database at `config.sqlite_path`.
    pub fn open(config: &ServingConfig) -> Result<Self> {
        let path = Path::new(&config.sqlite_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(LoadError::connection)?;
            }
        }
        let conn = Connection::open(path).map_err(LoadError::connection)?;
        tracing::info!(path = %path.display(), "Opened SQLite serving store");
        Ok(Self::with_connection(conn, config))
    }

    /// In-memory database, dropped with the store.
    pub fn in_memory(config: &ServingConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(LoadError::connection)?;
        Ok(Self::with_connection(conn, config))
    }

    fn with_connection(conn: Connection, config: &ServingConfig) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            schema_gold: config.schema_gold.clone(),
            schema_meta: config.schema_meta.clone(),
        }
    }

    /// Run `op` against the connection without holding up the async executor.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| LoadError::lock_poisoned())?;
            op(&mut guard)
        })
        .await
        .map_err(LoadError::task_failed)?
    }

    fn runs_table(&self) -> String {
        sqlite_table_name(&self.schema_meta, RUNS_TABLE)
    }
}

fn runs_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         run_id TEXT PRIMARY KEY, \
         status TEXT NOT NULL, \
         details TEXT NOT NULL, \
         recorded_at TEXT NOT NULL)",
        sqlite_quote(table)
    )
}

fn upsert_rows(conn: &mut Connection, table: &str, frame: &RecordBatch, pk_cols: &[String]) -> Result<UpsertSummary> {
    let pk_cols: Vec<&str> = pk_cols.iter().map(String::as_str).collect();
    let spec = TableSpec::from_frame(table, frame, &pk_cols)?;
    let rows = sorted_rows(&spec, frame)?;
    let key_indices = spec.key_indices();

    // take the write lock up front; other writers wait on the busy timeout
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| LoadError::query("begin", table, e))?;
    tx.execute_batch(&sqlite_create_table(table, &spec))
        .map_err(|e| LoadError::query("create table", table, e))?;

    let mut summary = UpsertSummary::default();
    {
        let mut exists = tx
            .prepare(&sqlite_exists(table, &spec))
            .map_err(|e| LoadError::query("prepare lookup", table, e))?;
        let mut upsert = tx
            .prepare(&sqlite_upsert(table, &spec))
            .map_err(|e| LoadError::query("prepare upsert", table, e))?;

        for row in &rows {
            let present = exists
                .exists(params_from_iter(key_values(&key_indices, row)))
                .map_err(|e| LoadError::query("lookup", table, e))?;
            let changed = upsert
                .execute(params_from_iter(row.iter()))
                .map_err(|e| LoadError::query("upsert", table, e))?;

            summary.count(match (present, changed) {
                (false, _) => RowOutcome::Inserted,
                (true, 0) => RowOutcome::Unchanged,
                (true, _) => RowOutcome::Updated,
            });
        }
    }

    // an early return above drops `tx`, which rolls back
    tx.commit().map_err(|e| LoadError::query("commit", table, e))?;
    Ok(summary)
}

#[async_trait]
impl ServingStore for SqliteStore {
    fn backend(&self) -> ServingBackend {
        ServingBackend::Sqlite
    }

    async fn upsert_gold_table(&self, table: &str, frame: &RecordBatch, pk_cols: &[&str]) -> Result<UpsertSummary> {
        let qualified = sqlite_table_name(&self.schema_gold, table);
        let frame = frame.clone();
        let pk_cols: Vec<String> = pk_cols.iter().map(|c| c.to_string()).collect();

        let target = qualified.clone();
        let summary = self
            .blocking(move |conn| upsert_rows(conn, &target, &frame, &pk_cols))
            .await?;
        tracing::info!(
            table = %qualified,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "Gold table upserted"
        );
        Ok(summary)
    }

    async fn record_run(&self, record: &RunRecord) -> Result<()> {
        let table = self.runs_table();
        let details = serde_json::to_string(&record.details).map_err(|e| LoadError::query("record run", &table, e))?;
        let run_id = record.run_id.clone();
        let status = record.status.as_str();

        self.blocking(move |conn| {
            conn.execute_batch(&runs_ddl(&table))
                .map_err(|e| LoadError::query("create table", &table, e))?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (run_id, status, details, recorded_at) VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT (run_id) DO UPDATE SET status = excluded.status, \
                     details = excluded.details, recorded_at = excluded.recorded_at",
                    sqlite_quote(&table)
                ),
                params![run_id, status, details, utc_now_iso()],
            )
            .map_err(|e| LoadError::query("record run", &table, e))?;
            Ok(())
        })
        .await?;

        tracing::debug!(run_id = %record.run_id, status = %record.status, "Run recorded");
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<StoredRun>> {
        let table = self.runs_table();
        let key = run_id.to_string();

        let row = self
            .blocking(move |conn| {
                let present: bool = conn
                    .query_row(
                        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                        [&table],
                        |row| row.get(0),
                    )
                    .map_err(|e| LoadError::query("lookup", &table, e))?;
                if !present {
                    return Ok(None);
                }

                conn.query_row(
                    &format!(
                        "SELECT status, details, recorded_at FROM {} WHERE run_id = ?1",
                        sqlite_quote(&table)
                    ),
                    [&key],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
                )
                .optional()
                .map_err(|e| LoadError::query("get run", &table, e))
            })
            .await?;

        let Some((status, details, recorded_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredRun {
            record: RunRecord {
                run_id: run_id.to_string(),
                status: parse_status(run_id, &status)?,
                details: serde_json::from_str(&details).map_err(|e| LoadError::corrupt_record(run_id, e))?,
            },
            recorded_at,
        }))
    }
}
