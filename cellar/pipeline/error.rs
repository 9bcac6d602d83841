use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the pipeline.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Failures raised by pipeline components.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configuration document is missing, unparsable, empty, or lacks a key.
    #[error("configuration error: {0}")]
    Config(String),
    /// The remote dataset could not be fetched.
    #[error("failed to acquire {url} into {}: {message}", path.display())]
    Acquisition {
        /// Source URL.
        url: String,
        /// Local archive path.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
    /// The archive could not be expanded.
    #[error("failed to expand {} into {}: {message}", archive.display(), destination.display())]
    Expansion {
        /// Archive path.
        archive: PathBuf,
        /// Target directory.
        destination: PathBuf,
        /// Underlying failure.
        message: String,
    },
    /// Tabular input or a persisted model is absent or malformed.
    #[error("failed to read {}: {message}", path.display())]
    DataRead {
        /// Offending file.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
    /// The validation gate is closed.
    #[error("data schema is not valid ({}): {reason}", status_file.display())]
    SchemaInvalid {
        /// Status file consulted.
        status_file: PathBuf,
        /// Why the gate is closed.
        reason: String,
    },
    /// An output artifact could not be written.
    #[error("failed to write {}: {message}", path.display())]
    ArtifactWrite {
        /// Target file.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
    /// Model fitting or persistence failed.
    #[error("training failed: {0}")]
    Training(String),
    /// Metrics could not be computed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    /// The metrics report could not be written.
    #[error("failed to write metrics to {}: {source}", path.display())]
    MetricWrite {
        /// Metrics file.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The experiment-tracking sink failed.
    #[error("tracking sink {uri} failed: {source:#}")]
    Tracking {
        /// Tracking URI in use.
        uri: String,
        /// Sink failure.
        #[source]
        source: anyhow::Error,
    },
    /// Serving-time prediction failed.
    #[error("prediction failed: {0}")]
    Prediction(String),
}

impl PipelineError {
    /// Short taxonomy label used in logs and the run ledger.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Acquisition { .. } => "AcquisitionError",
            Self::Expansion { .. } => "ExpansionError",
            Self::DataRead { .. } => "DataReadError",
            Self::SchemaInvalid { .. } => "SchemaInvalidError",
            Self::ArtifactWrite { .. } => "ArtifactWriteError",
            Self::Training(_) => "TrainingError",
            Self::Evaluation(_) => "EvaluationError",
            Self::MetricWrite { .. } => "MetricWriteError",
            Self::Tracking { .. } => "TrackingError",
            Self::Prediction(_) => "PredictionError",
        }
    }
}
