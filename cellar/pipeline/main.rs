use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use chrono::Utc;
use serde_json::json;
use shared_tracking::TrackingSink;
use thiserror::Error;

use crate::{
    config::{ConfigPaths, ConfigurationManager},
    error::{PipelineError, Result},
    evaluation::ModelEvaluation,
    ingestion::{AcquireOutcome, DataIngestion},
    manifest::{RunManifest, RunManifestEntry, RunState},
    regression::reporter::{MetricsReport, TrainingReport},
    telemetry::PipelineTelemetry,
    trainer::ModelTrainer,
    transformation::DataTransformation,
    validation::DataValidation,
};

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Download and expand the dataset.
    Ingest,
    /// Check the header against the schema.
    Validate,
    /// Write the train/test splits.
    Split,
    /// Fit and persist the model.
    Train,
    /// Score the model and record the run.
    Evaluate,
}

impl Stage {
    /// Every stage, in order.
    pub const ALL: [Self; 5] = [
        Self::Ingest,
        Self::Validate,
        Self::Split,
        Self::Train,
        Self::Evaluate,
    ];

    /// Human-readable title used in stage banners.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Ingest => "Data Ingestion",
            Self::Validate => "Data Validation",
            Self::Split => "Data Transformation",
            Self::Train => "Model Trainer",
            Self::Evaluate => "Model Evaluation",
        }
    }

    /// Command-line key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Validate => "validate",
            Self::Split => "split",
            Self::Train => "train",
            Self::Evaluate => "evaluate",
        }
    }

    /// Stage that follows, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Ingest => Some(Self::Validate),
            Self::Validate => Some(Self::Split),
            Self::Split => Some(Self::Train),
            Self::Train => Some(Self::Evaluate),
            Self::Evaluate => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ingest" | "data_ingestion" => Ok(Self::Ingest),
            "validate" | "data_validation" => Ok(Self::Validate),
            "split" | "transform" | "data_transformation" => Ok(Self::Split),
            "train" | "model_trainer" => Ok(Self::Train),
            "evaluate" | "model_evaluation" => Ok(Self::Evaluate),
            other => Err(PipelineError::Config(format!("unknown stage `{other}`"))),
        }
    }
}

/// Result produced by one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Ingestion outcome.
    Ingested(AcquireOutcome),
    /// Validation verdict (a `false` verdict is not an error).
    Validated(bool),
    /// Split file locations.
    Split {
        /// Training split.
        train: PathBuf,
        /// Test split.
        test: PathBuf,
    },
    /// Training report.
    Trained(TrainingReport),
    /// Evaluation metrics.
    Evaluated(MetricsReport),
}

/// A stage failed; later stages were not attempted.
#[derive(Debug, Error)]
#[error("stage {stage} failed: {source}")]
pub struct StageFailure {
    /// Failing stage.
    pub stage: Stage,
    /// Underlying error.
    #[source]
    pub source: PipelineError,
}

/// Outputs of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Ledger id when a ledger is configured.
    pub run_id: Option<String>,
    /// Stage outputs in execution order.
    pub outputs: Vec<(Stage, StageOutput)>,
}

/// Executes the stages sequentially; each stage builds its configuration fresh from
/// the documents and exchanges data with the others only through files.
#[derive(Clone)]
pub struct PipelineRunner {
    paths: ConfigPaths,
    telemetry: PipelineTelemetry,
    manifest: Option<RunManifest>,
    sink: Option<Arc<dyn TrackingSink>>,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("paths", &self.paths)
            .field("manifest", &self.manifest)
            .field("sink_override", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Runner over the given documents.
    #[must_use]
    pub fn new(paths: ConfigPaths, telemetry: &PipelineTelemetry) -> Self {
        Self {
            paths,
            telemetry: telemetry.scoped("pipeline"),
            manifest: None,
            sink: None,
        }
    }

    /// Records every run in a JSON-lines ledger.
    #[must_use]
    pub fn with_manifest(mut self, manifest: RunManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Sends evaluation tracking to `sink` instead of the one named by the environment.
    #[must_use]
    pub fn with_tracking_sink(mut self, sink: Arc<dyn TrackingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs every stage once, stopping at the first failure.
    pub fn run(&self) -> Result<RunReport, StageFailure> {
        let entry = self.open_ledger_entry();
        let mut outputs = Vec::with_capacity(Stage::ALL.len());
        let mut stage = Some(Stage::Ingest);
        while let Some(current) = stage {
            match self.run_stage(current) {
                Ok(output) => outputs.push((current, output)),
                Err(failure) => {
                    self.close_ledger_entry(entry.as_ref(), Some(&failure));
                    return Err(failure);
                }
            }
            stage = current.next();
        }
        self.close_ledger_entry(entry.as_ref(), None);
        Ok(RunReport {
            run_id: entry.map(|entry| entry.run_id),
            outputs,
        })
    }

    /// Runs exactly one stage.
    pub fn run_stage(&self, stage: Stage) -> Result<StageOutput, StageFailure> {
        self.telemetry.info(
            &format!(">>>>>> stage: {} started <<<<<<", stage.title()),
            json!({ "stage": stage.key() }),
        );
        match self.execute(stage) {
            Ok(output) => {
                self.telemetry.info(
                    &format!(">>>>>> stage: {} completed <<<<<<", stage.title()),
                    json!({ "stage": stage.key() }),
                );
                Ok(output)
            }
            Err(source) => {
                self.telemetry.error(
                    &format!("stage {} failed", stage.title()),
                    json!({ "stage": stage.key(), "kind": source.kind(), "error": source.to_string() }),
                );
                Err(StageFailure { stage, source })
            }
        }
    }

    fn execute(&self, stage: Stage) -> Result<StageOutput> {
        let config = ConfigurationManager::from_paths(&self.paths)?.with_telemetry(&self.telemetry);
        match stage {
            Stage::Ingest => {
                let stage = DataIngestion::new(config.get_data_ingestion_config()?, &self.telemetry);
                stage.run().map(StageOutput::Ingested)
            }
            Stage::Validate => {
                let stage =
                    DataValidation::new(config.get_data_validation_config()?, &self.telemetry);
                stage.validate().map(StageOutput::Validated)
            }
            Stage::Split => {
                let stage = DataTransformation::new(
                    config.get_data_transformation_config()?,
                    &self.telemetry,
                );
                stage
                    .run()
                    .map(|(train, test)| StageOutput::Split { train, test })
            }
            Stage::Train => {
                let stage = ModelTrainer::new(config.get_model_trainer_config()?, &self.telemetry);
                stage.train().map(StageOutput::Trained)
            }
            Stage::Evaluate => {
                let stage =
                    ModelEvaluation::new(config.get_model_evaluation_config()?, &self.telemetry);
                let report = match &self.sink {
                    Some(sink) => stage.evaluate_with_sink(sink.as_ref())?,
                    None => stage.evaluate()?,
                };
                Ok(StageOutput::Evaluated(report))
            }
        }
    }

    fn open_ledger_entry(&self) -> Option<RunManifestEntry> {
        let manifest = self.manifest.as_ref()?;
        let entry = RunManifestEntry::new(
            self.paths.config.clone(),
            Stage::ALL.iter().map(|stage| stage.key().to_string()).collect(),
        );
        if let Err(err) = manifest.append(&entry) {
            self.telemetry.warn(
                "run ledger append failed",
                json!({ "path": manifest.path(), "error": format!("{err:#}") }),
            );
            return None;
        }
        self.telemetry
            .debug("run registered", json!({ "run_id": entry.run_id }));
        Some(entry)
    }

    fn close_ledger_entry(&self, entry: Option<&RunManifestEntry>, failure: Option<&StageFailure>) {
        let (Some(manifest), Some(entry)) = (self.manifest.as_ref(), entry) else {
            return;
        };
        let result = manifest.update(&entry.run_id, |entry| {
            entry.finished_at = Some(Utc::now());
            match failure {
                Some(failure) => {
                    entry.status = RunState::Failed;
                    entry.failed_stage = Some(failure.stage.key().to_string());
                    entry.error = Some(failure.source.to_string());
                }
                None => entry.status = RunState::Completed,
            }
        });
        if let Err(err) = result {
            self.telemetry.warn(
                "run ledger update failed",
                json!({ "path": manifest.path(), "error": format!("{err:#}") }),
            );
        }
    }
}
