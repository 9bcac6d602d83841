#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Experiment-tracking sinks: a run records hyperparameters, metrics and a model artifact.

/// Local directory-backed tracking store.
pub mod file_store;
/// MLflow REST tracking client.
pub mod mlflow;

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use file_store::FileTrackingStore;
pub use mlflow::{MlflowCredentials, MlflowTrackingSink};

/// Directory used when no tracking URI is configured.
pub const DEFAULT_LOCAL_STORE: &str = "mlruns";

/// Handle for an open tracking run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunHandle {
    /// Sink-assigned run identifier.
    pub run_id: String,
    /// Sink-assigned experiment identifier.
    pub experiment_id: String,
    /// Human-readable experiment name.
    pub experiment: String,
    /// When the run was opened.
    pub started_at: DateTime<Utc>,
}

/// Terminal state reported when a run is closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    /// Every logging call succeeded.
    Finished,
    /// The run was aborted.
    Failed,
}

impl RunStatus {
    /// Wire label used by MLflow-compatible stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// Model file forwarded to the sink together with one example input row.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    /// Artifact sub-path inside the run (e.g. `model`).
    pub artifact_path: String,
    /// Serialized model on local disk.
    pub file: PathBuf,
    /// Example input, keyed by feature name.
    pub input_example: serde_json::Value,
}

/// Destination for run parameters, metrics and model artifacts.
pub trait TrackingSink: Send + Sync {
    /// True when the sink is a plain local file store (no model registry).
    fn is_local(&self) -> bool;

    /// Opens a run under the named experiment.
    fn start_run(&self, experiment: &str) -> Result<RunHandle>;

    /// Records hyperparameters.
    fn log_params(&self, run: &RunHandle, params: &IndexMap<String, String>) -> Result<()>;

    /// Records scalar metrics.
    fn log_metrics(&self, run: &RunHandle, metrics: &IndexMap<String, f64>) -> Result<()>;

    /// Uploads the model artifact.
    fn log_model(&self, run: &RunHandle, artifact: &ModelArtifact) -> Result<()>;

    /// Registers a previously logged model artifact under a registry name.
    fn register_model(&self, run: &RunHandle, artifact_path: &str, name: &str) -> Result<()>;

    /// Closes the run.
    fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<()>;
}

/// Parsed tracking URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingUri {
    /// Local directory store (`file:` URIs, bare paths, or unset).
    Local(PathBuf),
    /// HTTP(S) tracking server base URL.
    Remote(String),
}

impl TrackingUri {
    /// Parses the raw value of the tracking URI setting.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(Self::Local(PathBuf::from(DEFAULT_LOCAL_STORE)));
        };
        if let Some(rest) = raw.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        if let Some(rest) = raw.strip_prefix("file:") {
            return Ok(Self::Local(PathBuf::from(rest)));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Remote(raw.trim_end_matches('/').to_string()));
        }
        match raw.split_once("://") {
            Some((scheme, _)) => bail!("unsupported tracking uri scheme '{scheme}' in {raw}"),
            None => Ok(Self::Local(PathBuf::from(raw))),
        }
    }

    /// URI scheme label (`file`, `http` or `https`).
    #[must_use]
    pub fn scheme(&self) -> &str {
        match self {
            Self::Local(_) => "file",
            Self::Remote(url) => url.split_once("://").map_or("http", |(scheme, _)| scheme),
        }
    }
}

/// Opens the sink matching the URI; remote sinks read credentials from the environment.
pub fn open_sink(uri: &TrackingUri) -> Result<Box<dyn TrackingSink>> {
    match uri {
        TrackingUri::Local(root) => Ok(Box::new(FileTrackingStore::open(root)?)),
        TrackingUri::Remote(base) => Ok(Box::new(MlflowTrackingSink::from_env(base.clone())?)),
    }
}

/// Call recorded by [`MemoryTrackingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    /// `start_run`.
    RunStarted {
        /// Experiment name.
        experiment: String,
    },
    /// `log_params`.
    Params(IndexMap<String, String>),
    /// `log_metrics`.
    Metrics(IndexMap<String, f64>),
    /// `log_model`.
    Model {
        /// Artifact sub-path.
        artifact_path: String,
        /// Size of the uploaded file in bytes.
        bytes: u64,
    },
    /// `register_model`.
    Registered {
        /// Registry name.
        name: String,
    },
    /// `end_run`.
    RunEnded(RunStatus),
}

/// In-memory sink for local development and tests.
#[derive(Debug)]
pub struct MemoryTrackingSink {
    local: bool,
    fail_on_metrics: bool,
    events: Mutex<Vec<TrackingEvent>>,
}

impl MemoryTrackingSink {
    /// Sink that reports itself as a local file store.
    #[must_use]
    pub fn local() -> Self {
        Self::new(true)
    }

    /// Sink that reports itself as a remote tracking server.
    #[must_use]
    pub fn remote() -> Self {
        Self::new(false)
    }

    /// Sink whose `log_metrics` always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_on_metrics: true,
            ..Self::new(true)
        }
    }

    fn new(local: bool) -> Self {
        Self {
            local,
            fail_on_metrics: false,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the recorded calls.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TrackingEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: TrackingEvent) {
        self.events.lock().push(event);
    }
}

impl TrackingSink for MemoryTrackingSink {
    fn is_local(&self) -> bool {
        self.local
    }

    fn start_run(&self, experiment: &str) -> Result<RunHandle> {
        self.record(TrackingEvent::RunStarted {
            experiment: experiment.to_string(),
        });
        Ok(RunHandle {
            run_id: Uuid::new_v4().simple().to_string(),
            experiment_id: experiment.to_string(),
            experiment: experiment.to_string(),
            started_at: Utc::now(),
        })
    }

    fn log_params(&self, _run: &RunHandle, params: &IndexMap<String, String>) -> Result<()> {
        self.record(TrackingEvent::Params(params.clone()));
        Ok(())
    }

    fn log_metrics(&self, _run: &RunHandle, metrics: &IndexMap<String, f64>) -> Result<()> {
        if self.fail_on_metrics {
            bail!("tracking sink rejected metrics");
        }
        self.record(TrackingEvent::Metrics(metrics.clone()));
        Ok(())
    }

    fn log_model(&self, _run: &RunHandle, artifact: &ModelArtifact) -> Result<()> {
        let bytes = file_len(&artifact.file)?;
        self.record(TrackingEvent::Model {
            artifact_path: artifact.artifact_path.clone(),
            bytes,
        });
        Ok(())
    }

    fn register_model(&self, _run: &RunHandle, _artifact_path: &str, name: &str) -> Result<()> {
        self.record(TrackingEvent::Registered {
            name: name.to_string(),
        });
        Ok(())
    }

    fn end_run(&self, _run: &RunHandle, status: RunStatus) -> Result<()> {
        self.record(TrackingEvent::RunEnded(status));
        Ok(())
    }
}

fn file_len(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracking_uris() {
        assert_eq!(
            TrackingUri::parse(None).unwrap(),
            TrackingUri::Local(PathBuf::from(DEFAULT_LOCAL_STORE))
        );
        assert_eq!(
            TrackingUri::parse(Some("  ")).unwrap(),
            TrackingUri::Local(PathBuf::from(DEFAULT_LOCAL_STORE))
        );
        assert_eq!(
            TrackingUri::parse(Some("file:///tmp/mlruns")).unwrap(),
            TrackingUri::Local(PathBuf::from("/tmp/mlruns"))
        );
        assert_eq!(
            TrackingUri::parse(Some("runs/local")).unwrap(),
            TrackingUri::Local(PathBuf::from("runs/local"))
        );
        let remote = TrackingUri::parse(Some("https://dagshub.com/acme/wine.mlflow/")).unwrap();
        assert_eq!(
            remote,
            TrackingUri::Remote("https://dagshub.com/acme/wine.mlflow".into())
        );
        assert_eq!(remote.scheme(), "https");
        assert!(TrackingUri::parse(Some("databricks://profile")).is_err());
    }

    #[test]
    fn memory_sink_records_calls_in_order() {
        let sink = MemoryTrackingSink::remote();
        let run = sink.start_run("wine-quality").unwrap();
        let mut params = IndexMap::new();
        params.insert("alpha".to_string(), "0.2".to_string());
        sink.log_params(&run, &params).unwrap();
        sink.register_model(&run, "model", "ElasticNet_model").unwrap();
        sink.end_run(&run, RunStatus::Finished).unwrap();
        let events = sink.snapshot();
        assert_eq!(events.len(), 4);
        assert!(!sink.is_local());
        assert_eq!(events[3], TrackingEvent::RunEnded(RunStatus::Finished));
    }

    #[test]
    fn failing_sink_rejects_metrics() {
        let sink = MemoryTrackingSink::failing();
        let run = sink.start_run("wine-quality").unwrap();
        assert!(sink.log_metrics(&run, &IndexMap::new()).is_err());
    }
}
