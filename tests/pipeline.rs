use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use macro_ingest::{Extraction, ExtractionError, Extractor, FailureNotifier, Pipeline, RunOptions};
use macro_ingest_config::{AppConfig, ServingBackend, ServingConfig, StorageBackend, StorageConfig};
use macro_ingest_core::bea::BeaQuery;
use macro_ingest_core::{DatasetRef, ErrorCode, RunPhase, RunStatus, Stage, StageFailure};
use macro_ingest_loader::{LoadError, RunRecord, ServingStore, SqliteStore, StoredRun, UpsertSummary};
use macro_ingest_writer::RawStore;
use serde_json::{json, Value};

struct FixedExtractor {
    payload: Value,
}

#[async_trait]
impl Extractor for FixedExtractor {
    async fn extract(&self, query: &BeaQuery) -> Result<Extraction, ExtractionError> {
        Ok(Extraction {
            payload: self.payload.clone(),
            request_params: query.request_params(),
            row_count: 3,
        })
    }
}

struct EmptyExtractor;

#[async_trait]
impl Extractor for EmptyExtractor {
    async fn extract(&self, query: &BeaQuery) -> Result<Extraction, ExtractionError> {
        Err(ExtractionError::EmptyResult {
            dataset: query.dataset.clone(),
            table_name: query.table_name.clone(),
        })
    }
}

/// Never answers.
struct StalledExtractor;

#[async_trait]
impl Extractor for StalledExtractor {
    async fn extract(&self, _query: &BeaQuery) -> Result<Extraction, ExtractionError> {
        std::future::pending().await
    }
}

/// SQLite store that counts upsert calls.
struct CountingStore {
    inner: SqliteStore,
    upserts: AtomicUsize,
}

#[async_trait]
impl ServingStore for CountingStore {
    fn backend(&self) -> ServingBackend {
        self.inner.backend()
    }

    async fn upsert_gold_table(
        &self,
        table: &str,
        frame: &RecordBatch,
        pk_cols: &[&str],
    ) -> Result<UpsertSummary, LoadError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_gold_table(table, frame, pk_cols).await
    }

    async fn record_run(&self, record: &RunRecord) -> Result<(), LoadError> {
        self.inner.record_run(record).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<StoredRun>, LoadError> {
        self.inner.get_run(run_id).await
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<(String, Stage, ErrorCode)>>,
}

impl FailureNotifier for RecordingNotifier {
    fn notify(&self, failure: &StageFailure) {
        self.seen
            .lock()
            .unwrap()
            .push((failure.run_id.clone(), failure.stage, failure.code()));
    }
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<CountingStore>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self::with_config(extractor, &AppConfig::default())
    }

    fn with_config(extractor: Arc<dyn Extractor>, config: &AppConfig) -> Self {
        let raw_store = RawStore::from_config(&StorageConfig {
            backend: Some(StorageBackend::Memory),
            ..StorageConfig::default()
        })
        .unwrap();
        let store = Arc::new(CountingStore {
            inner: SqliteStore::in_memory(&ServingConfig::default()).unwrap(),
            upserts: AtomicUsize::new(0),
        });
        let notifier = Arc::new(RecordingNotifier::default());

        let pipeline = Pipeline::new(config, raw_store)
            .with_extractor(extractor)
            .with_serving(store.clone())
            .with_notifier(notifier.clone());

        Self {
            pipeline,
            store,
            notifier,
        }
    }

    fn with_days(mut self, days: &'static [&'static str]) -> Self {
        let calls = AtomicUsize::new(0);
        self.pipeline = self.pipeline.with_clock(Arc::new(move || {
            let i = calls.fetch_add(1, Ordering::SeqCst).min(days.len() - 1);
            days[i].to_string()
        }));
        self
    }
}

fn options(run_id: &str) -> RunOptions {
    RunOptions {
        run_id: run_id.to_string(),
        smoke: false,
    }
}

fn observation(fips: &str, period: &str, value: &str) -> Value {
    json!({
        "Code": "SQPCE-1",
        "GeoFips": fips,
        "GeoName": "Somewhere",
        "TimePeriod": period,
        "CL_UNIT": "Millions of current dollars",
        "UNIT_MULT": "6",
        "DataValue": value
    })
}

fn sqpce_payload() -> Value {
    json!({
        "BEAAPI": {
            "Request": {"RequestParam": [
                {"ParameterName": "DATASETNAME", "ParameterValue": "Regional"},
                {"ParameterName": "TABLENAME", "ParameterValue": "SQPCE"}
            ]},
            "Results": {"Data": [
                observation("01000", "2023", "190,123.4"),
                observation("02000", "2023", "(NA)"),
                observation("01000", "2024", "200,000"),
            ]}
        }
    })
}

fn fixed(payload: Value) -> Arc<dyn Extractor> {
    Arc::new(FixedExtractor { payload })
}

#[tokio::test]
async fn run_all_completes_and_records_success() {
    let h = Harness::new(fixed(sqpce_payload()));

    let report = h.pipeline.run_all(&options("run-all-1")).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.details["command"], "run-all");
    assert_eq!(report.details["extract"]["row_count"], 3);
    assert_eq!(report.details["extract"]["upstream_unchanged"], false);
    assert_eq!(report.details["transform"]["gold_rows"], 3);
    assert_eq!(report.details["load"]["inserted"], 3);
    assert_eq!(report.details["load"]["table"], "regional_sqpce");
    assert_eq!(
        report.details["transform"]["parent_hash"],
        report.details["extract"]["payload_hash"]
    );

    let stored = h.store.get_run("run-all-1").await.unwrap().unwrap();
    assert_eq!(stored.record.status, RunStatus::Success);
    assert_eq!(stored.record.details["phase"], "completed");
    assert!(h.notifier.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unchanged_upstream_hashes_identically_on_two_days() {
    let h = Harness::new(fixed(sqpce_payload()))
        .with_days(&["2025-03-01T06:00:00+00:00", "2025-03-02T06:00:00+00:00"]);

    let first = h.pipeline.ingest(&options("run-day-1")).await.unwrap();
    let second = h.pipeline.ingest(&options("run-day-2")).await.unwrap();

    assert_eq!(first.status, RunStatus::Partial);
    assert_eq!(first.phase, RunPhase::RawStored);
    assert_eq!(
        first.details["extract"]["payload_hash"],
        second.details["extract"]["payload_hash"]
    );
    assert_ne!(first.details["extract"]["raw_path"], second.details["extract"]["raw_path"]);
    assert_eq!(second.details["extract"]["extract_date"], "2025-03-02");
    assert_eq!(second.details["extract"]["upstream_unchanged"], true);

    let latest = h
        .pipeline
        .raw_store()
        .latest_bronze_manifest(&DatasetRef::bea("Regional", "SQPCE"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.manifest.run_id, "run-day-2");
}

#[tokio::test]
async fn same_day_repeat_ingest_is_a_no_op() {
    let h = Harness::new(fixed(sqpce_payload()))
        .with_days(&["2025-03-01T06:00:00+00:00", "2025-03-01T18:00:00+00:00"]);

    h.pipeline.ingest(&options("run-a")).await.unwrap();
    let again = h.pipeline.ingest(&options("run-b")).await.unwrap();

    assert_eq!(again.details["extract"]["raw_outcome"], "already_present");
    assert_eq!(again.details["extract"]["manifest_outcome"], "already_present");
}

#[tokio::test]
async fn failed_transform_never_reaches_the_loader() {
    let mut broken = sqpce_payload();
    broken["BEAAPI"]["Results"]["Data"][1]
        .as_object_mut()
        .unwrap()
        .remove("GeoName");
    let h = Harness::new(fixed(broken));

    let failure = h.pipeline.run_all(&options("run-bad")).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Transform);
    assert_eq!(failure.code(), ErrorCode::E004Transform);
    assert_eq!(failure.code().exit_code(), 5);
    assert_eq!(h.store.upserts.load(Ordering::SeqCst), 0);

    let stored = h.store.get_run("run-bad").await.unwrap().unwrap();
    assert_eq!(stored.record.status, RunStatus::Failure);
    assert_eq!(stored.record.details["stage"], "transform");
    assert_eq!(stored.record.details["error_code"], "E004");
    assert_eq!(stored.record.details["phase"], "failed");
    assert!(stored.record.details["reason"]
        .as_str()
        .unwrap()
        .contains("missing GeoName"));

    let seen = h.notifier.seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![("run-bad".to_string(), Stage::Transform, ErrorCode::E004Transform)]
    );
}

#[tokio::test]
async fn standalone_stages_chain_through_storage() {
    let h = Harness::new(fixed(sqpce_payload()));

    h.pipeline.ingest(&options("run-ingest")).await.unwrap();
    let transformed = h.pipeline.transform(&options("run-transform")).await.unwrap();
    assert_eq!(transformed.status, RunStatus::Partial);
    assert_eq!(transformed.phase, RunPhase::Transformed);

    let first = h.pipeline.load(&options("run-load-1")).await.unwrap();
    assert_eq!(first.status, RunStatus::Partial);
    assert_eq!(first.details["load"]["inserted"], 3);

    // the same gold frame a second time changes nothing
    let second = h.pipeline.load(&options("run-load-2")).await.unwrap();
    assert_eq!(second.details["load"]["inserted"], 0);
    assert_eq!(second.details["load"]["updated"], 0);
    assert_eq!(second.details["load"]["unchanged"], 3);
    assert_eq!(
        first.details["load"]["gold_fingerprint"],
        transformed.details["transform"]["gold_fingerprint"]
    );
}

#[tokio::test]
async fn load_without_gold_is_a_storage_failure() {
    let h = Harness::new(fixed(sqpce_payload()));

    let failure = h.pipeline.load(&options("run-early")).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Load);
    assert_eq!(failure.code(), ErrorCode::E006Storage);
    let stored = h.store.get_run("run-early").await.unwrap().unwrap();
    assert_eq!(stored.record.status, RunStatus::Failure);
}

#[tokio::test]
async fn extraction_failure_stops_run_all() {
    let h = Harness::new(Arc::new(EmptyExtractor));

    let failure = h.pipeline.run_all(&options("run-empty")).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Extract);
    assert_eq!(failure.code().exit_code(), 3);
    assert_eq!(h.store.upserts.load(Ordering::SeqCst), 0);
    assert!(h
        .pipeline
        .raw_store()
        .latest_bronze_manifest(&DatasetRef::bea("Regional", "SQPCE"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn stalled_extract_is_abandoned_at_the_stage_timeout() {
    let mut config = AppConfig::default();
    config.pipeline.stage_timeout_secs = 1;
    let h = Harness::with_config(Arc::new(StalledExtractor), &config);

    let failure = h.pipeline.run_all(&options("run-stalled")).await.unwrap_err();

    assert_eq!(failure.stage, Stage::Extract);
    assert_eq!(failure.code(), ErrorCode::E002Extraction);
    assert_eq!(failure.code().exit_code(), 3);

    let stored = h.store.get_run("run-stalled").await.unwrap().unwrap();
    assert_eq!(stored.record.status, RunStatus::Failure);
    assert_eq!(stored.record.details["error_code"], "E002");
    assert!(stored.record.details["reason"]
        .as_str()
        .unwrap()
        .contains("extract stage exceeded 1s"));

    assert!(h
        .pipeline
        .raw_store()
        .latest_bronze_manifest(&DatasetRef::bea("Regional", "SQPCE"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.store.upserts.load(Ordering::SeqCst), 0);
    assert_eq!(h.notifier.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn ingest_without_api_key_is_a_configuration_failure() {
    let config = AppConfig::default();
    let raw_store = RawStore::from_config(&StorageConfig {
        backend: Some(StorageBackend::Memory),
        ..StorageConfig::default()
    })
    .unwrap();
    let store = Arc::new(SqliteStore::in_memory(&ServingConfig::default()).unwrap());
    let pipeline = Pipeline::new(&config, raw_store).with_serving(store.clone());

    let failure = pipeline.ingest(&options("run-nokey")).await.unwrap_err();

    assert_eq!(failure.code(), ErrorCode::E001Configuration);
    assert_eq!(failure.code().exit_code(), 2);
    let stored = store.get_run("run-nokey").await.unwrap().unwrap();
    assert_eq!(stored.record.details["error_kind"], "ConfigurationError");
}
