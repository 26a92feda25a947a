//! Immutable layer store over an OpenDAL operator
//!
//! Every object is written at most once: paths are derived from content
//! hashes (payloads, frames) or run ids (stage manifests), and a path that
//! already exists is left untouched.

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate};
use macro_ingest_config::StorageConfig;
use macro_ingest_core::hash::hash_canonical;
use macro_ingest_core::{frame_fingerprint, CanonicalValue, DatasetRef, RunManifest, Stage};
use opendal::{ErrorKind, Operator};
use serde_json::Value;

use crate::encoding::{decode_parquet, encode_parquet};
use crate::error::{Result, WriterError};
use crate::partition::{extract_date_of, file_name, Layer, PartitionLayout, MANIFEST_PREFIX};
use crate::retry::RetryPolicy;
use crate::storage::build_operator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawWriteOutcome {
    Written,
    /// The object existed already and was not touched.
    AlreadyPresent,
}

impl RawWriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::AlreadyPresent => "already_present",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWrite {
    pub path: String,
    pub payload_hash: String,
    pub outcome: RawWriteOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameWrite {
    pub path: String,
    pub fingerprint: String,
    pub row_count: u64,
    pub outcome: RawWriteOutcome,
}

/// A manifest read back from storage along with its object path.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredManifest {
    pub path: String,
    pub manifest: RunManifest,
}

pub struct RawStore {
    operator: Operator,
    layout: PartitionLayout,
    retry: RetryPolicy,
}

impl RawStore {
    pub fn new(operator: Operator, prefix_root: &str) -> Self {
        Self {
            operator,
            layout: PartitionLayout::new(prefix_root),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let operator = build_operator(config)?;
        Ok(Self::new(operator, &config.prefix_root)
            .with_retry(RetryPolicy::with_max_attempts(config.max_attempts)))
    }

    pub fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    /// Store a bronze payload under its content hash.
    ///
    /// The stored bytes are the canonical encoding, so re-hashing the object
    /// reproduces `payload_hash`.
    pub async fn write_raw_payload(
        &self,
        dataset: &DatasetRef,
        extract_date: NaiveDate,
        payload: &Value,
    ) -> Result<RawWrite> {
        let canonical = CanonicalValue::from_serialize(payload)?;
        let payload_hash = hash_canonical(&canonical);
        let path = self.layout.payload_path(dataset, extract_date, &payload_hash);

        let outcome = self
            .put_if_absent(&path, Bytes::from(canonical.to_canonical_string()))
            .await?;

        tracing::info!(
            path = %path,
            payload_hash = %payload_hash,
            outcome = outcome.as_str(),
            "Raw payload stored"
        );

        Ok(RawWrite {
            path,
            payload_hash,
            outcome,
        })
    }

    /// Store the bronze manifest next to its payload. Requires `payload_hash`.
    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<(String, RawWriteOutcome)> {
        let payload_hash = manifest
            .payload_hash
            .as_deref()
            .ok_or_else(|| WriterError::incomplete_manifest(&manifest.run_id, "payload_hash is not set"))?;
        let extract_date = manifest_extract_date(manifest)?;
        let path = self
            .layout
            .manifest_path(&dataset_of(manifest), extract_date, payload_hash);

        let outcome = self.put_if_absent(&path, Bytes::from(manifest.to_json()?)).await?;
        tracing::debug!(path = %path, outcome = outcome.as_str(), "Bronze manifest stored");
        Ok((path, outcome))
    }

    /// Store a transform or load manifest, one object per run.
    pub async fn write_stage_manifest(&self, manifest: &RunManifest) -> Result<(String, RawWriteOutcome)> {
        let extract_date = manifest_extract_date(manifest)?;
        let path = self.layout.stage_manifest_path(
            manifest.stage,
            &dataset_of(manifest),
            extract_date,
            &manifest.run_id,
        );

        let outcome = self.put_if_absent(&path, Bytes::from(manifest.to_json()?)).await?;
        tracing::debug!(path = %path, stage = %manifest.stage, outcome = outcome.as_str(), "Stage manifest stored");
        Ok((path, outcome))
    }

    /// Encode a silver or gold frame as Parquet under its fingerprint.
    pub async fn write_frame(
        &self,
        layer: Layer,
        dataset: &DatasetRef,
        extract_date: NaiveDate,
        batch: &RecordBatch,
    ) -> Result<FrameWrite> {
        let fingerprint = frame_fingerprint(batch)?;
        let path = self.layout.frame_path(layer, dataset, extract_date, &fingerprint);

        let outcome = if self.exists(&path).await? {
            RawWriteOutcome::AlreadyPresent
        } else {
            let encoded = encode_parquet(batch, &path)?;
            self.put(&path, Bytes::from(encoded)).await?;
            RawWriteOutcome::Written
        };

        tracing::info!(
            layer = %layer,
            path = %path,
            rows = batch.num_rows(),
            outcome = outcome.as_str(),
            "Frame stored"
        );

        Ok(FrameWrite {
            path,
            fingerprint,
            row_count: batch.num_rows() as u64,
            outcome,
        })
    }

    pub async fn read_json(&self, path: &str) -> Result<Value> {
        let bytes = self.get(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| WriterError::corrupt(path, "JSON document", e))
    }

    pub async fn read_manifest(&self, path: &str) -> Result<RunManifest> {
        let bytes = self.get(path).await?;
        RunManifest::from_json(&bytes).map_err(|e| WriterError::corrupt(path, "run manifest", e))
    }

    pub async fn read_frame(&self, path: &str) -> Result<RecordBatch> {
        let bytes = self.get(path).await?;
        decode_parquet(bytes, path)
    }

    /// Read the bronze payload a manifest points at and check its hash.
    pub async fn read_raw_payload(&self, manifest: &RunManifest) -> Result<Value> {
        let payload_hash = manifest
            .payload_hash
            .as_deref()
            .ok_or_else(|| WriterError::incomplete_manifest(&manifest.run_id, "payload_hash is not set"))?;
        let path = self.layout.payload_path(
            &dataset_of(manifest),
            manifest_extract_date(manifest)?,
            payload_hash,
        );

        let payload = self.read_json(&path).await?;
        let actual = hash_canonical(&CanonicalValue::from_serialize(&payload)?);
        if actual != payload_hash {
            return Err(WriterError::corrupt(
                &path,
                "raw payload",
                format!("content hash {actual} does not match manifest hash {payload_hash}"),
            ));
        }
        Ok(payload)
    }

    /// Newest bronze manifest: greatest extract date, then latest capture time.
    pub async fn latest_bronze_manifest(&self, dataset: &DatasetRef) -> Result<Option<StoredManifest>> {
        let dir = self.layout.dataset_dir(Layer::Bronze, dataset);
        let paths = self
            .list_json(&dir)
            .await?
            .into_iter()
            .filter(|path| file_name(path).starts_with(MANIFEST_PREFIX))
            .collect();
        self.newest_of(paths).await
    }

    /// Newest manifest recorded for `stage`, ordered like bronze manifests.
    pub async fn latest_stage_manifest(&self, stage: Stage, dataset: &DatasetRef) -> Result<Option<StoredManifest>> {
        let dir = self.layout.stage_manifest_dir(stage, dataset);
        let paths = self.list_json(&dir).await?;
        self.newest_of(paths).await
    }

    async fn newest_of(&self, paths: Vec<String>) -> Result<Option<StoredManifest>> {
        let mut newest: Option<((NaiveDate, DateTime<FixedOffset>), StoredManifest)> = None;

        for path in newest_partition(paths) {
            let manifest = self.read_manifest(&path).await?;
            let captured = DateTime::parse_from_rfc3339(&manifest.extracted_at_utc)
                .map_err(|e| WriterError::corrupt(&path, "run manifest", e))?;
            let rank = (captured.naive_utc().date(), captured);

            // ties keep the lexically greatest path so the choice is stable
            let replace = match &newest {
                None => true,
                Some((best, current)) => rank > *best || (rank == *best && path > current.path),
            };
            if replace {
                newest = Some((rank, StoredManifest { path, manifest }));
            }
        }

        Ok(newest.map(|(_, stored)| stored))
    }

    async fn put_if_absent(&self, path: &str, bytes: Bytes) -> Result<RawWriteOutcome> {
        if self.exists(path).await? {
            return Ok(RawWriteOutcome::AlreadyPresent);
        }
        self.put(path, bytes).await?;
        Ok(RawWriteOutcome::Written)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.retry
            .run("stat", || async move {
                match self.operator.stat(path).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(WriterError::storage("stat", path, e)),
                }
            })
            .await
    }

    async fn put(&self, path: &str, bytes: Bytes) -> Result<()> {
        self.retry
            .run("write", || {
                let bytes = bytes.clone();
                async move {
                    self.operator
                        .write(path, bytes)
                        .await
                        .map(|_| ())
                        .map_err(|e| WriterError::storage("write", path, e))
                }
            })
            .await
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        self.retry
            .run("read", || async move {
                self.operator
                    .read(path)
                    .await
                    .map(|buffer| buffer.to_bytes())
                    .map_err(|e| WriterError::storage("read", path, e))
            })
            .await
    }

    /// All `.json` objects below `dir`; a missing directory is empty.
    async fn list_json(&self, dir: &str) -> Result<Vec<String>> {
        let entries = self
            .retry
            .run("list", || async move {
                match self.operator.list_with(dir).recursive(true).await {
                    Ok(entries) => Ok(entries),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
                    Err(e) => Err(WriterError::storage("list", dir, e)),
                }
            })
            .await?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.path().to_string())
            .filter(|path| path.ends_with(".json"))
            .collect())
    }
}

/// Paths in the latest `extract_date=` partition, plus any without one.
///
/// The partition date is the manifest's extract date, so older partitions
/// can never hold the newest manifest and are not read.
fn newest_partition(paths: Vec<String>) -> Vec<String> {
    let latest = paths.iter().filter_map(|path| extract_date_of(path)).max();
    paths
        .into_iter()
        .filter(|path| match extract_date_of(path) {
            Some(date) => Some(date) == latest,
            None => true,
        })
        .collect()
}

fn dataset_of(manifest: &RunManifest) -> DatasetRef {
    DatasetRef {
        source: manifest.source.clone(),
        dataset: manifest.dataset.clone(),
    }
}

fn manifest_extract_date(manifest: &RunManifest) -> Result<NaiveDate> {
    manifest
        .extract_date()
        .map_err(|e| WriterError::incomplete_manifest(&manifest.run_id, e))
}
