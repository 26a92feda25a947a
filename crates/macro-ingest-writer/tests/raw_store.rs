use std::sync::Arc;

use arrow::array::{Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use macro_ingest_config::{StorageBackend, StorageConfig};
use macro_ingest_core::{stable_payload_hash, DatasetRef, RunManifest, Stage};
use macro_ingest_writer::{file_name, Layer, Operator, RawStore, RawWriteOutcome};
use serde_json::{json, Value};

fn memory_store() -> RawStore {
    let op = Operator::new(opendal::services::Memory::default())
        .unwrap()
        .finish();
    RawStore::new(op, "staging")
}

fn dataset() -> DatasetRef {
    DatasetRef::bea("Regional", "SQPCE")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn payload(value: &str) -> Value {
    json!({
        "BEAAPI": {
            "Results": {
                "Data": [
                    {"Code": "SQPCE-1", "GeoFips": "01000", "GeoName": "Alabama", "TimePeriod": "2024", "DataValue": value}
                ]
            }
        }
    })
}

fn manifest(run_id: &str, extracted_at: &str, payload: &Value) -> RunManifest {
    let ds = dataset();
    RunManifest::new(run_id, Stage::Extract, &ds.source, &ds.dataset, extracted_at, Default::default())
        .with_payload_hash(stable_payload_hash(payload).unwrap())
        .with_row_count(1)
}

fn gold_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("line_code", DataType::Int32, false),
        Field::new("geo_fips", DataType::Utf8, false),
        Field::new("value", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from(vec![1, 1])),
            Arc::new(StringArray::from(vec!["01000", "02000"])),
            Arc::new(Float64Array::from(vec![Some(10.5), None])),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn same_payload_same_day_is_a_noop() {
    let store = memory_store();
    let first = store
        .write_raw_payload(&dataset(), day(4), &payload("1,234"))
        .await
        .unwrap();
    assert_eq!(first.outcome, RawWriteOutcome::Written);
    assert_eq!(first.payload_hash, stable_payload_hash(&payload("1,234")).unwrap());
    assert!(first
        .path
        .starts_with("staging/bronze/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/payload-"));

    let second = store
        .write_raw_payload(&dataset(), day(4), &payload("1,234"))
        .await
        .unwrap();
    assert_eq!(second.outcome, RawWriteOutcome::AlreadyPresent);
    assert_eq!(second.path, first.path);
}

#[tokio::test]
async fn different_payload_lands_beside_the_first() {
    let store = memory_store();
    let a = store.write_raw_payload(&dataset(), day(4), &payload("1")).await.unwrap();
    let b = store.write_raw_payload(&dataset(), day(4), &payload("2")).await.unwrap();
    assert_eq!(b.outcome, RawWriteOutcome::Written);
    assert_ne!(a.path, b.path);

    let stored = store.read_json(&a.path).await.unwrap();
    assert_eq!(stored, payload("1"));
}

#[tokio::test]
async fn manifests_are_written_once_and_read_back() {
    let store = memory_store();
    let body = payload("7");
    store.write_raw_payload(&dataset(), day(4), &body).await.unwrap();

    let m = manifest("run-1", "2026-03-04T10:00:00.000000+00:00", &body);
    let (path, outcome) = store.write_manifest(&m).await.unwrap();
    assert_eq!(outcome, RawWriteOutcome::Written);
    assert!(file_name(&path).starts_with("manifest-"));

    // a second run with the same content does not replace the stored manifest
    let again = manifest("run-2", "2026-03-04T11:00:00.000000+00:00", &body);
    let (_, outcome) = store.write_manifest(&again).await.unwrap();
    assert_eq!(outcome, RawWriteOutcome::AlreadyPresent);
    assert_eq!(store.read_manifest(&path).await.unwrap().run_id, "run-1");

    assert_eq!(store.read_raw_payload(&m).await.unwrap(), body);
}

#[tokio::test]
async fn manifest_without_hash_is_rejected() {
    let store = memory_store();
    let ds = dataset();
    let m = RunManifest::new(
        "run-1",
        Stage::Extract,
        &ds.source,
        &ds.dataset,
        "2026-03-04T10:00:00+00:00",
        Default::default(),
    );
    let err = store.write_manifest(&m).await.unwrap_err();
    assert!(err.to_string().contains("payload_hash"));
}

#[tokio::test]
async fn latest_bronze_manifest_prefers_later_dates() {
    let store = memory_store();
    assert!(store.latest_bronze_manifest(&dataset()).await.unwrap().is_none());

    for (run, ts, value) in [
        ("run-a", "2026-03-05T08:00:00+00:00", "1"),
        ("run-b", "2026-03-04T23:00:00+00:00", "2"),
        ("run-c", "2026-03-05T09:30:00+00:00", "3"),
    ] {
        let body = payload(value);
        let m = manifest(run, ts, &body);
        store
            .write_raw_payload(&dataset(), m.extract_date().unwrap(), &body)
            .await
            .unwrap();
        store.write_manifest(&m).await.unwrap();
    }

    let latest = store.latest_bronze_manifest(&dataset()).await.unwrap().unwrap();
    assert_eq!(latest.manifest.run_id, "run-c");
    assert!(latest.path.contains("extract_date=2026-03-05"));
}

#[tokio::test]
async fn older_partitions_are_not_read_when_picking_the_latest() {
    let op = Operator::new(opendal::services::Memory::default())
        .unwrap()
        .finish();
    let store = RawStore::new(op.clone(), "staging");

    let old_body = payload("1");
    let old = manifest("run-old", "2026-03-04T10:00:00+00:00", &old_body);
    store.write_raw_payload(&dataset(), day(4), &old_body).await.unwrap();
    let (old_path, _) = store.write_manifest(&old).await.unwrap();

    let new_body = payload("2");
    let new = manifest("run-new", "2026-03-05T10:00:00+00:00", &new_body);
    store.write_raw_payload(&dataset(), day(5), &new_body).await.unwrap();
    store.write_manifest(&new).await.unwrap();

    // an unreadable manifest in an older partition must not matter
    op.write(&old_path, b"not json".to_vec()).await.unwrap();

    let latest = store.latest_bronze_manifest(&dataset()).await.unwrap().unwrap();
    assert_eq!(latest.manifest.run_id, "run-new");
}

#[tokio::test]
async fn stage_manifests_are_keyed_by_run() {
    let store = memory_store();
    let body = payload("1");
    let transform = manifest("run-1", "2026-03-04T10:00:00+00:00", &body).derive("run-9", Stage::Transform);

    let (path, _) = store.write_stage_manifest(&transform).await.unwrap();
    assert!(path.ends_with("manifests/stage=transform/source=bea/dataset=regional_sqpce/extract_date=2026-03-04/run-9.json"));

    let latest = store
        .latest_stage_manifest(Stage::Transform, &dataset())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.manifest, transform);
    assert!(store
        .latest_stage_manifest(Stage::Load, &dataset())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn frames_round_trip_through_parquet() {
    let store = memory_store();
    let batch = gold_batch();
    let write = store
        .write_frame(Layer::Gold, &dataset(), day(4), &batch)
        .await
        .unwrap();
    assert_eq!(write.outcome, RawWriteOutcome::Written);
    assert_eq!(write.row_count, 2);
    assert!(file_name(&write.path).starts_with("gold-"));

    let again = store
        .write_frame(Layer::Gold, &dataset(), day(4), &batch)
        .await
        .unwrap();
    assert_eq!(again.outcome, RawWriteOutcome::AlreadyPresent);

    let read = store.read_frame(&write.path).await.unwrap();
    assert_eq!(read.columns(), batch.columns());
}

#[tokio::test]
async fn fs_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StorageConfig::default();
    config.backend = Some(StorageBackend::Fs);
    config.fs.path = dir.path().display().to_string();
    config.prefix_root = "local".to_string();

    let store = RawStore::from_config(&config).unwrap();
    let write = store
        .write_raw_payload(&dataset(), day(4), &payload("5"))
        .await
        .unwrap();

    let on_disk = dir.path().join(&write.path);
    let bytes = std::fs::read(on_disk).unwrap();
    // stored bytes are the canonical encoding
    assert!(!bytes.contains(&b' '));
    assert_eq!(
        serde_json::from_slice::<Value>(&bytes).unwrap(),
        payload("5")
    );
}

#[tokio::test]
async fn tampered_payload_is_reported() {
    let op = Operator::new(opendal::services::Memory::default())
        .unwrap()
        .finish();
    let store = RawStore::new(op.clone(), "staging");
    let body = payload("1");
    let written = store.write_raw_payload(&dataset(), day(4), &body).await.unwrap();

    op.write(&written.path, b"{\"BEAAPI\":{}}".to_vec()).await.unwrap();

    let m = manifest("run-1", "2026-03-04T10:00:00+00:00", &body);
    let err = store.read_raw_payload(&m).await.unwrap_err();
    assert!(err.to_string().contains("does not match"));
}
