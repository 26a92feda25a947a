use macro_ingest_core::schema::{gold, gold_schema};
use macro_ingest_core::transform::{from_bea_payload, to_gold_frame, GoldContext};
use macro_ingest_core::{frame_fingerprint, DatasetRef, PipelineError, RunManifest, RunPhase, Stage};
use macro_ingest_writer::Layer;
use serde_json::json;
use tracing::{debug, info};

use super::{Pipeline, Run};

impl Pipeline {
    /// Pull from upstream, store the redacted payload and its bronze manifest.
    pub(super) async fn extract_stage(&self, run: &mut Run, smoke: bool) -> Result<RunManifest, PipelineError> {
        let query = self.query(smoke);
        let dataset = self.dataset();
        let extractor = self.extractor()?;

        info!(run_id = %run.id(), stage = "extract", dataset = %dataset, year = %query.year, "Extracting");
        let extraction = extractor.extract(&query).await?;
        run.tracker.advance(RunPhase::Extracted)?;

        let previous = self.raw_store.latest_bronze_manifest(&dataset).await?;

        let manifest = RunManifest::new(
            run.id(),
            Stage::Extract,
            &dataset.source,
            &dataset.dataset,
            (self.clock)(),
            extraction.request_params,
        );
        let extract_date = manifest.extract_date()?;

        let raw = self
            .raw_store
            .write_raw_payload(&dataset, extract_date, &extraction.payload)
            .await?;
        let manifest = manifest
            .with_row_count(extraction.row_count)
            .with_payload_hash(&raw.payload_hash)
            .with_output_partitions(vec![raw.path.clone()]);
        let (manifest_path, manifest_outcome) = self.raw_store.write_manifest(&manifest).await?;
        run.tracker.advance(RunPhase::RawStored)?;

        let upstream_unchanged = previous.as_ref().is_some_and(|prior| {
            prior.manifest.payload_hash.as_deref() == Some(raw.payload_hash.as_str())
                && prior.manifest.request_params == manifest.request_params
        });

        info!(
            run_id = %run.id(),
            stage = "extract",
            payload_hash = %raw.payload_hash,
            rows = extraction.row_count,
            outcome = raw.outcome.as_str(),
            upstream_unchanged,
            "Raw payload stored"
        );

        run.details.insert(
            "extract".into(),
            json!({
                "payload_hash": raw.payload_hash,
                "row_count": extraction.row_count,
                "extract_date": extract_date.format("%Y-%m-%d").to_string(),
                "raw_path": raw.path,
                "raw_outcome": raw.outcome.as_str(),
                "manifest_path": manifest_path,
                "manifest_outcome": manifest_outcome.as_str(),
                "upstream_unchanged": upstream_unchanged,
            }),
        );
        Ok(manifest)
    }

    /// Silver and gold from a bronze manifest, or from the newest one stored.
    pub(super) async fn transform_stage(
        &self,
        run: &mut Run,
        bronze: Option<RunManifest>,
    ) -> Result<RunManifest, PipelineError> {
        let bronze = match bronze {
            Some(manifest) => manifest,
            None => {
                let dataset = self.dataset();
                let stored = self.raw_store.latest_bronze_manifest(&dataset).await?.ok_or_else(|| {
                    PipelineError::Storage(format!("no raw payload stored for {dataset}; run ingest first"))
                })?;
                debug!(run_id = %run.id(), stage = "transform", path = %stored.path, "Using newest bronze manifest");
                stored.manifest
            }
        };
        let bronze_hash = bronze.payload_hash.clone().ok_or_else(|| {
            PipelineError::Internal(format!("bronze manifest of run {} has no payload hash", bronze.run_id))
        })?;

        info!(run_id = %run.id(), stage = "transform", source_run = %bronze.run_id, "Transforming");

        let payload = self.raw_store.read_raw_payload(&bronze).await?;
        let silver = from_bea_payload(&payload)?;
        let gold_frame = to_gold_frame(&silver, &GoldContext::from_request_params(&bronze.request_params)?)?;

        let dataset = dataset_of(&bronze);
        let extract_date = bronze.extract_date()?;
        let silver_write = self
            .raw_store
            .write_frame(Layer::Silver, &dataset, extract_date, &silver)
            .await?;
        let gold_write = self
            .raw_store
            .write_frame(Layer::Gold, &dataset, extract_date, &gold_frame)
            .await?;

        let manifest = bronze
            .derive(run.id(), Stage::Transform)
            .with_row_count(gold_write.row_count)
            .with_payload_hash(&gold_write.fingerprint)
            .with_output_partitions(vec![silver_write.path.clone(), gold_write.path.clone()])
            .with_parent_hash(&bronze_hash);
        let (manifest_path, _) = self.raw_store.write_stage_manifest(&manifest).await?;
        run.tracker.advance(RunPhase::Transformed)?;

        info!(
            run_id = %run.id(),
            stage = "transform",
            silver_rows = silver_write.row_count,
            gold_rows = gold_write.row_count,
            gold_fingerprint = %gold_write.fingerprint,
            "Transform complete"
        );

        run.details.insert(
            "transform".into(),
            json!({
                "parent_hash": bronze_hash,
                "silver_path": silver_write.path,
                "silver_rows": silver_write.row_count,
                "gold_path": gold_write.path,
                "gold_rows": gold_write.row_count,
                "gold_fingerprint": gold_write.fingerprint,
                "manifest_path": manifest_path,
            }),
        );
        Ok(manifest)
    }

    /// Upsert the gold frame a transform manifest points at.
    pub(super) async fn load_stage(
        &self,
        run: &mut Run,
        transformed: Option<RunManifest>,
    ) -> Result<RunManifest, PipelineError> {
        let transformed = match transformed {
            Some(manifest) => manifest,
            None => {
                let dataset = self.dataset();
                let stored = self
                    .raw_store
                    .latest_stage_manifest(Stage::Transform, &dataset)
                    .await?
                    .ok_or_else(|| {
                        PipelineError::Storage(format!("no gold frame stored for {dataset}; run transform first"))
                    })?;
                debug!(run_id = %run.id(), stage = "load", path = %stored.path, "Using newest transform manifest");
                stored.manifest
            }
        };
        let fingerprint = transformed.payload_hash.clone().ok_or_else(|| {
            PipelineError::Internal(format!(
                "transform manifest of run {} has no gold fingerprint",
                transformed.run_id
            ))
        })?;

        let dataset = dataset_of(&transformed);
        let path = self
            .raw_store
            .layout()
            .frame_path(Layer::Gold, &dataset, transformed.extract_date()?, &fingerprint);
        let frame = self.raw_store.read_frame(&path).await?;

        let actual = frame_fingerprint(&frame)?;
        if actual != fingerprint {
            return Err(PipelineError::Storage(format!(
                "gold frame {path} has fingerprint {actual}, expected {fingerprint}"
            )));
        }
        gold_schema().validate(&frame)?;

        let store = self.serving().await?;
        let table = dataset.serving_table();
        info!(
            run_id = %run.id(),
            stage = "load",
            table,
            backend = %store.backend(),
            rows = frame.num_rows(),
            "Loading"
        );
        let summary = store.upsert_gold_table(table, &frame, gold::PRIMARY_KEY).await?;

        let manifest = transformed
            .derive(run.id(), Stage::Load)
            .with_row_count(summary.total())
            .with_payload_hash(&fingerprint)
            .with_output_partitions(vec![format!("{}.{table}", self.serving_config.schema_gold)])
            .with_parent_hash(&fingerprint);
        let (manifest_path, _) = self.raw_store.write_stage_manifest(&manifest).await?;
        run.tracker.advance(RunPhase::Loaded)?;

        info!(
            run_id = %run.id(),
            stage = "load",
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "Load complete"
        );

        run.details.insert(
            "load".into(),
            json!({
                "table": table,
                "gold_fingerprint": fingerprint,
                "inserted": summary.inserted,
                "updated": summary.updated,
                "unchanged": summary.unchanged,
                "manifest_path": manifest_path,
            }),
        );
        Ok(manifest)
    }
}

fn dataset_of(manifest: &RunManifest) -> DatasetRef {
    DatasetRef::new(&manifest.source, &manifest.dataset)
}
