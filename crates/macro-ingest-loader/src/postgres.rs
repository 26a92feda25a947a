//! PostgreSQL serving store.
//!
//! One `tokio_postgres::Client` behind an async mutex; every call runs in its
//! own transaction. DDL is serialized across processes with a
//! transaction-scoped advisory lock keyed by the table name.

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use macro_ingest_config::{ServingBackend, ServingConfig};
use macro_ingest_core::utc_now_iso;
use pg_escape::quote_identifier;
use tokio::sync::Mutex;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Transaction};

use crate::error::{LoadError, Result};
use crate::frame::{sorted_rows, TableSpec};
use crate::sql::{pg_create_table, pg_qualified, pg_upsert};
use crate::{parse_status, RowOutcome, RunRecord, ServingStore, StoredRun, UpsertSummary, RUNS_TABLE};

pub struct PostgresStore {
    client: Mutex<Client>,
    schema_gold: String,
    schema_meta: String,
}

impl PostgresStore {
    pub async fn connect(config: &ServingConfig) -> Result<Self> {
        let pg = &config.postgres;
        if pg.host.is_empty() {
            return Err(LoadError::invalid_config("PG_HOST is required for the postgres backend"));
        }
        if pg.user.is_empty() {
            return Err(LoadError::invalid_config("PG_USER is required for the postgres backend"));
        }

        let mut pg_config = PgConfig::new();
        pg_config.host(&pg.host);
        pg_config.port(pg.port);
        pg_config.user(&pg.user);
        if !pg.password.is_empty() {
            pg_config.password(&pg.password);
        }
        pg_config.dbname(&pg.database);

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(LoadError::connection)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        tracing::info!(host = %pg.host, port = pg.port, database = %pg.database, "Connected to PostgreSQL");

        Ok(Self {
            client: Mutex::new(client),
            schema_gold: config.schema_gold.clone(),
            schema_meta: config.schema_meta.clone(),
        })
    }

    fn runs_table(&self) -> String {
        pg_qualified(&self.schema_meta, RUNS_TABLE)
    }

    /// Create `schema` and the table under the advisory lock for `qualified`.
    async fn ensure_table(tx: &Transaction<'_>, schema: &str, qualified: &str, ddl: &str) -> Result<()> {
        tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&qualified])
            .await
            .map_err(|e| LoadError::query("lock", qualified, e))?;
        tx.batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema)))
            .await
            .map_err(|e| LoadError::query("create schema", qualified, e))?;
        tx.batch_execute(ddl)
            .await
            .map_err(|e| LoadError::query("create table", qualified, e))?;
        Ok(())
    }

    fn runs_ddl(qualified: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {qualified} (\
             run_id TEXT PRIMARY KEY, \
             status TEXT NOT NULL, \
             details JSONB NOT NULL, \
             recorded_at TEXT NOT NULL)"
        )
    }
}

#[async_trait]
impl ServingStore for PostgresStore {
    fn backend(&self) -> ServingBackend {
        ServingBackend::Postgres
    }

    async fn upsert_gold_table(&self, table: &str, frame: &RecordBatch, pk_cols: &[&str]) -> Result<UpsertSummary> {
        let qualified = pg_qualified(&self.schema_gold, table);
        let spec = TableSpec::from_frame(&qualified, frame, pk_cols)?;
        let rows = sorted_rows(&spec, frame)?;

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| LoadError::query("begin", &qualified, e))?;

        Self::ensure_table(&tx, &self.schema_gold, &qualified, &pg_create_table(&qualified, &spec)).await?;

        let statement = tx
            .prepare(&pg_upsert(&qualified, &spec))
            .await
            .map_err(|e| LoadError::query("prepare upsert", &qualified, e))?;

        let mut summary = UpsertSummary::default();
        for row in &rows {
            let params: Vec<_> = row.iter().map(|v| v.as_pg()).collect();
            let returned = tx
                .query_opt(&statement, &params)
                .await
                .map_err(|e| LoadError::query("upsert", &qualified, e))?;

            let outcome = match returned {
                None => RowOutcome::Unchanged,
                Some(r) => {
                    let inserted: bool = r.try_get(0).map_err(|e| LoadError::query("upsert", &qualified, e))?;
                    if inserted {
                        RowOutcome::Inserted
                    } else {
                        RowOutcome::Updated
                    }
                }
            };
            summary.count(outcome);
        }

        // dropping an uncommitted transaction rolls it back
        tx.commit()
            .await
            .map_err(|e| LoadError::query("commit", &qualified, e))?;

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
        let qualified = self.runs_table();
        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| LoadError::query("begin", &qualified, e))?;

        Self::ensure_table(&tx, &self.schema_meta, &qualified, &Self::runs_ddl(&qualified)).await?;

        let sql = format!(
            "INSERT INTO {qualified} (run_id, status, details, recorded_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (run_id) DO UPDATE SET status = EXCLUDED.status, \
             details = EXCLUDED.details, recorded_at = EXCLUDED.recorded_at"
        );
        let recorded_at = utc_now_iso();
        tx.execute(
            sql.as_str(),
            &[&record.run_id, &record.status.as_str(), &record.details, &recorded_at],
        )
        .await
        .map_err(|e| LoadError::query("record run", &qualified, e))?;

        tx.commit()
            .await
            .map_err(|e| LoadError::query("commit", &qualified, e))?;

        tracing::debug!(run_id = %record.run_id, status = %record.status, "Run recorded");
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<StoredRun>> {
        let qualified = self.runs_table();
        let client = self.client.lock().await;

        // a missing table just means nothing was recorded yet
        let exists = client
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&qualified])
            .await
            .map_err(|e| LoadError::query("lookup", &qualified, e))?;
        let present: bool = exists.try_get(0).map_err(|e| LoadError::query("lookup", &qualified, e))?;
        if !present {
            return Ok(None);
        }

        let sql = format!("SELECT status, details, recorded_at FROM {qualified} WHERE run_id = $1");
        let row = client
            .query_opt(sql.as_str(), &[&run_id])
            .await
            .map_err(|e| LoadError::query("get run", &qualified, e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get(0).map_err(|e| LoadError::corrupt_record(run_id, e))?;
        let details: serde_json::Value = row.try_get(1).map_err(|e| LoadError::corrupt_record(run_id, e))?;
        let recorded_at: String = row.try_get(2).map_err(|e| LoadError::corrupt_record(run_id, e))?;

        Ok(Some(StoredRun {
            record: RunRecord {
                run_id: run_id.to_string(),
                status: parse_status(run_id, &status)?,
                details,
            },
            recorded_at,
        }))
    }
}
