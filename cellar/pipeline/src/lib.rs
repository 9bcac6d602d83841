#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Cellar wine-quality pipeline: configuration store, file-handoff stages, predictor and runner.

/// Default document and artifact locations.
#[path = "../constants.rs"]
pub mod constants;

/// Error taxonomy shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Telemetry handle injected into components.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Typed per-stage configuration values.
#[path = "../entity.rs"]
pub mod entity;

/// Configuration store reading the YAML documents.
#[path = "../config.rs"]
pub mod config;

/// Tabular data, split, metrics and the ElasticNet kernel.
#[path = "../regression/main.rs"]
pub mod regression;

/// Dataset acquisition and archive expansion.
#[path = "../ingestion.rs"]
pub mod ingestion;

/// Schema validation and the status gate.
#[path = "../validation.rs"]
pub mod validation;

/// Train/test splitting.
#[path = "../transformation.rs"]
pub mod transformation;

/// Model training stage.
#[path = "../trainer.rs"]
pub mod trainer;

/// Model evaluation and tracking.
#[path = "../evaluation.rs"]
pub mod evaluation;

/// Serving-time predictor.
#[path = "../prediction.rs"]
pub mod prediction;

/// Run ledger persisted as JSON lines.
#[path = "../manifest.rs"]
pub mod manifest;

/// Sequential pipeline runner.
#[path = "../main.rs"]
pub mod runner;

pub use config::{ConfigPaths, ConfigurationManager};
pub use entity::{
    DataIngestionConfig, DataTransformationConfig, DataValidationConfig, ModelEvaluationConfig,
    ModelPredictionConfig, ModelTrainerConfig, Schema,
};
pub use error::{PipelineError, Result};
pub use evaluation::ModelEvaluation;
pub use ingestion::{AcquireOutcome, DataIngestion};
pub use manifest::{RunManifest, RunManifestEntry, RunState};
pub use prediction::ModelPrediction;
pub use regression::{
    elastic_net::{ElasticNet, ElasticNetModel, ElasticNetParams},
    reporter::{MetricsReport, TrainingReport},
    table::Table,
};
pub use runner::{PipelineRunner, RunReport, Stage, StageFailure, StageOutput};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
pub use trainer::ModelTrainer;
pub use transformation::DataTransformation;
pub use validation::{read_validation_status, write_validation_status, DataValidation};
