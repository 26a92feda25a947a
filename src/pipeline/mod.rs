//! Run orchestration
//!
//! A [`Pipeline`] drives one run through extract, transform and load. Each
//! stage is bounded by the stage timeout; the first failure marks the run
//! failed, alerts, records the run and is returned as a [`StageFailure`].
//! Every command, successful or not, leaves exactly one run record.

mod stages;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use macro_ingest_config::{AppConfig, BeaConfig, ServingConfig};
use macro_ingest_core::bea::BeaQuery;
use macro_ingest_core::{strip_code, utc_now_iso, DatasetRef, PipelineError, RunPhase, RunStatus, RunTracker, Stage, StageFailure};
use macro_ingest_loader::{RunRecord, ServingStore};
use macro_ingest_writer::RawStore;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::alert::{FailureNotifier, LogNotifier};
use crate::extract::{BeaClient, Extractor};

/// Source of `extracted_at_utc` timestamps.
pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

/// Per-invocation options from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: String,
    pub smoke: bool,
}

/// What a successful command reports, and what was recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub details: Value,
}

pub struct Pipeline {
    bea: BeaConfig,
    serving_config: ServingConfig,
    raw_store: RawStore,
    extractor: Option<Arc<dyn Extractor>>,
    serving: OnceCell<Arc<dyn ServingStore>>,
    notifier: Arc<dyn FailureNotifier>,
    clock: Clock,
    stage_timeout: Duration,
}

impl Pipeline {
    /// Raw store from the storage section; the serving store is opened on
    /// first use so stages that never touch it run without its settings.
    pub fn from_config(config: &AppConfig) -> Result<Self, PipelineError> {
        let raw_store = RawStore::from_config(&config.storage)?;
        Ok(Self::new(config, raw_store))
    }

    pub fn new(config: &AppConfig, raw_store: RawStore) -> Self {
        Self {
            bea: config.bea.clone(),
            serving_config: config.serving.clone(),
            raw_store,
            extractor: None,
            serving: OnceCell::new(),
            notifier: Arc::new(LogNotifier::from_config(&config.alerts)),
            clock: Arc::new(utc_now_iso),
            stage_timeout: config.pipeline.stage_timeout(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_serving(mut self, store: Arc<dyn ServingStore>) -> Self {
        self.serving = OnceCell::from(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn raw_store(&self) -> &RawStore {
        &self.raw_store
    }

    /// Extract and store the raw payload.
    pub async fn ingest(&self, options: &RunOptions) -> Result<RunReport, StageFailure> {
        let mut run = Run::new(RunTracker::new(&options.run_id), "ingest", options);

        let extracted = self.timed(Stage::Extract, self.extract_stage(&mut run, options.smoke)).await;
        if let Err(error) = extracted {
            return Err(self.fail(run, Stage::Extract, error).await);
        }
        self.finish(run, Stage::Extract).await
    }

    /// Build silver and gold from the newest stored raw payload.
    pub async fn transform(&self, options: &RunOptions) -> Result<RunReport, StageFailure> {
        let mut run = Run::new(RunTracker::resume_at(&options.run_id, RunPhase::RawStored), "transform", options);

        let transformed = self.timed(Stage::Transform, self.transform_stage(&mut run, None)).await;
        if let Err(error) = transformed {
            return Err(self.fail(run, Stage::Transform, error).await);
        }
        self.finish(run, Stage::Transform).await
    }

    /// Upsert the newest gold frame into the serving store.
    pub async fn load(&self, options: &RunOptions) -> Result<RunReport, StageFailure> {
        let mut run = Run::new(RunTracker::resume_at(&options.run_id, RunPhase::Transformed), "load", options);

        let loaded = self.timed(Stage::Load, self.load_stage(&mut run, None)).await;
        if let Err(error) = loaded {
            return Err(self.fail(run, Stage::Load, error).await);
        }
        self.finish(run, Stage::Load).await
    }

    /// Extract, transform and load under one run_id, stopping at the first failure.
    pub async fn run_all(&self, options: &RunOptions) -> Result<RunReport, StageFailure> {
        let mut run = Run::new(RunTracker::new(&options.run_id), "run-all", options);

        let extracted = self.timed(Stage::Extract, self.extract_stage(&mut run, options.smoke)).await;
        let bronze = match extracted {
            Ok(manifest) => manifest,
            Err(error) => return Err(self.fail(run, Stage::Extract, error).await),
        };

        let transformed = self
            .timed(Stage::Transform, self.transform_stage(&mut run, Some(bronze)))
            .await;
        let gold = match transformed {
            Ok(manifest) => manifest,
            Err(error) => return Err(self.fail(run, Stage::Transform, error).await),
        };

        let loaded = self.timed(Stage::Load, self.load_stage(&mut run, Some(gold))).await;
        if let Err(error) = loaded {
            return Err(self.fail(run, Stage::Load, error).await);
        }
        if let Err(error) = run.tracker.advance(RunPhase::Completed) {
            return Err(self.fail(run, Stage::Load, error.into()).await);
        }
        self.finish(run, Stage::Load).await
    }

    fn query(&self, smoke: bool) -> BeaQuery {
        let query = BeaQuery {
            dataset: self.bea.dataset.clone(),
            table_name: self.bea.table_name.clone(),
            frequency: self.bea.frequency.clone(),
            year: self.bea.year.clone(),
            line_code: self.bea.line_code.clone(),
            geo_fips: self.bea.geo_fips.clone(),
        };
        if smoke {
            query.smoke()
        } else {
            query
        }
    }

    fn dataset(&self) -> DatasetRef {
        DatasetRef::bea(&self.bea.dataset, &self.bea.table_name)
    }

    fn extractor(&self) -> Result<Arc<dyn Extractor>, PipelineError> {
        if let Some(extractor) = &self.extractor {
            return Ok(Arc::clone(extractor));
        }
        if self.bea.api_key.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "BEA_API_KEY is required for ingest".to_string(),
            ));
        }
        Ok(Arc::new(BeaClient::new(&self.bea)?))
    }

    async fn serving(&self) -> Result<&Arc<dyn ServingStore>, PipelineError> {
        self.serving
            .get_or_try_init(|| async {
                let store = macro_ingest_loader::connect(&self.serving_config).await?;
                Ok::<Arc<dyn ServingStore>, PipelineError>(Arc::from(store))
            })
            .await
    }

    async fn timed<T>(
        &self,
        stage: Stage,
        work: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(self.stage_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(stage_timeout_error(stage, self.stage_timeout)),
        }
    }

    async fn record(&self, run: &Run) -> Result<(), PipelineError> {
        let record = RunRecord {
            run_id: run.tracker.run_id().to_string(),
            status: run.tracker.status(),
            details: Value::Object(run.details.clone()),
        };
        self.serving().await?.record_run(&record).await?;
        Ok(())
    }

    async fn finish(&self, mut run: Run, last_stage: Stage) -> Result<RunReport, StageFailure> {
        run.details
            .insert("phase".into(), Value::String(run.tracker.phase().to_string()));

        if let Err(error) = self.record(&run).await {
            let failure = StageFailure::new(run.tracker.run_id(), last_stage, into_load_error(error));
            self.notifier.notify(&failure);
            return Err(failure);
        }

        info!(
            run_id = %run.tracker.run_id(),
            stage = %last_stage,
            command = run.command,
            status = %run.tracker.status(),
            phase = %run.tracker.phase(),
            "Run finished"
        );

        Ok(RunReport {
            run_id: run.tracker.run_id().to_string(),
            status: run.tracker.status(),
            phase: run.tracker.phase(),
            details: Value::Object(run.details),
        })
    }

    async fn fail(&self, mut run: Run, stage: Stage, error: PipelineError) -> StageFailure {
        let reason = error.to_string();
        if let Err(e) = run.tracker.fail(stage, &reason) {
            warn!(run_id = %run.tracker.run_id(), stage = %stage, error = %e, "Run could not be marked failed");
        }

        let failure = StageFailure::new(run.tracker.run_id(), stage, error);
        self.notifier.notify(&failure);

        let code = failure.code();
        run.details.insert("phase".into(), Value::String(run.tracker.phase().to_string()));
        run.details.insert("stage".into(), Value::String(stage.to_string()));
        run.details
            .insert("error_code".into(), Value::String(code.as_str().to_string()));
        run.details
            .insert("error_kind".into(), Value::String(code.kind().to_string()));
        run.details.insert("reason".into(), Value::String(reason));

        // the stage failure is what the caller needs to see
        if let Err(e) = self.record(&run).await {
            warn!(run_id = %run.tracker.run_id(), stage = %stage, error = %e, "Failed run could not be recorded");
        }
        failure
    }
}

/// Tracker plus the details that end up in the run record.
struct Run {
    tracker: RunTracker,
    command: &'static str,
    details: Map<String, Value>,
}

impl Run {
    fn new(tracker: RunTracker, command: &'static str, options: &RunOptions) -> Self {
        let mut details = Map::new();
        details.insert("command".into(), Value::String(command.to_string()));
        details.insert("smoke".into(), Value::Bool(options.smoke));
        Self {
            tracker,
            command,
            details,
        }
    }

    fn id(&self) -> &str {
        self.tracker.run_id()
    }
}

/// A timed-out stage fails with the kind of error that stage would raise.
fn stage_timeout_error(stage: Stage, timeout: Duration) -> PipelineError {
    let message = format!("{stage} stage exceeded {}s", timeout.as_secs());
    match stage {
        Stage::Extract => PipelineError::Extraction(message),
        Stage::Transform => PipelineError::Storage(message),
        Stage::Load => PipelineError::Load(message),
    }
}

/// Run recording belongs to the serving store; configuration problems keep their kind.
fn into_load_error(error: PipelineError) -> PipelineError {
    match error {
        err @ (PipelineError::Load(_) | PipelineError::Configuration(_)) => err,
        other => PipelineError::Load(strip_code(&other.to_string()).to_string()),
    }
}
