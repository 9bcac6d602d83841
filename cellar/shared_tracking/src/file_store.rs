use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{ModelArtifact, RunHandle, RunStatus, TrackingSink};

/// Directory-backed store laid out as `<root>/<experiment>/<run_id>/...`.
#[derive(Debug, Clone)]
pub struct FileTrackingStore {
    root: PathBuf,
}

impl FileTrackingStore {
    /// Opens (and creates) the store root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating tracking store {}", root.display()))?;
        Ok(Self { root })
    }

    /// Directory holding one run.
    #[must_use]
    pub fn run_dir(&self, run: &RunHandle) -> PathBuf {
        self.root.join(&run.experiment_id).join(&run.run_id)
    }

    fn merge_into<V>(&self, path: &Path, entries: &IndexMap<String, V>) -> Result<()>
    where
        V: Serialize + DeserializeOwned + Clone,
    {
        let mut current: IndexMap<String, V> = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            IndexMap::new()
        };
        for (key, value) in entries {
            current.insert(key.clone(), value.clone());
        }
        write_json(path, &current)
    }
}

impl TrackingSink for FileTrackingStore {
    fn is_local(&self) -> bool {
        true
    }

    fn start_run(&self, experiment: &str) -> Result<RunHandle> {
        let run = RunHandle {
            run_id: Uuid::new_v4().simple().to_string(),
            experiment_id: sanitize(experiment),
            experiment: experiment.to_string(),
            started_at: Utc::now(),
        };
        let dir = self.run_dir(&run);
        fs::create_dir_all(dir.join("artifacts"))
            .with_context(|| format!("creating run directory {}", dir.display()))?;
        write_json(
            &dir.join("meta.json"),
            &json!({
                "run_id": run.run_id,
                "experiment": run.experiment,
                "status": "RUNNING",
                "start_time": run.started_at,
            }),
        )?;
        Ok(run)
    }

    fn log_params(&self, run: &RunHandle, params: &IndexMap<String, String>) -> Result<()> {
        self.merge_into(&self.run_dir(run).join("params.json"), params)
    }

    fn log_metrics(&self, run: &RunHandle, metrics: &IndexMap<String, f64>) -> Result<()> {
        self.merge_into(&self.run_dir(run).join("metrics.json"), metrics)
    }

    fn log_model(&self, run: &RunHandle, artifact: &ModelArtifact) -> Result<()> {
        let target_dir = self
            .run_dir(run)
            .join("artifacts")
            .join(&artifact.artifact_path);
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("creating artifact dir {}", target_dir.display()))?;
        let file_name = artifact
            .file
            .file_name()
            .with_context(|| format!("model path {} has no file name", artifact.file.display()))?;
        fs::copy(&artifact.file, target_dir.join(file_name)).with_context(|| {
            format!(
                "copying {} into {}",
                artifact.file.display(),
                target_dir.display()
            )
        })?;
        write_json(
            &target_dir.join("input_example.json"),
            &artifact.input_example,
        )
    }

    fn register_model(&self, _run: &RunHandle, _artifact_path: &str, name: &str) -> Result<()> {
        bail!(
            "cannot register model '{name}': the file store at {} has no model registry",
            self.root.display()
        )
    }

    fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<()> {
        let path = self.run_dir(run).join("meta.json");
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let mut meta: serde_json::Value = serde_json::from_str(&raw)?;
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("status".into(), json!(status.as_str()));
            obj.insert("end_time".into(), json!(Utc::now()));
        }
        write_json(&path, &meta)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_run_layout() {
        let dir = tempdir().unwrap();
        let store = FileTrackingStore::open(dir.path().join("mlruns")).unwrap();
        let run = store.start_run("wine quality").unwrap();
        assert_eq!(run.experiment_id, "wine_quality");

        let mut params = IndexMap::new();
        params.insert("alpha".to_string(), "0.2".to_string());
        params.insert("l1_ratio".to_string(), "0.1".to_string());
        store.log_params(&run, &params).unwrap();

        let mut metrics = IndexMap::new();
        metrics.insert("rmse".to_string(), 0.7);
        store.log_metrics(&run, &metrics).unwrap();
        metrics.clear();
        metrics.insert("r2".to_string(), 0.3);
        store.log_metrics(&run, &metrics).unwrap();

        let model = dir.path().join("model.bin");
        fs::write(&model, b"blob").unwrap();
        store
            .log_model(
                &run,
                &ModelArtifact {
                    artifact_path: "model".into(),
                    file: model,
                    input_example: json!({ "f1": 1.0 }),
                },
            )
            .unwrap();
        store.end_run(&run, RunStatus::Finished).unwrap();

        let run_dir = store.run_dir(&run);
        let stored: IndexMap<String, f64> =
            serde_json::from_str(&fs::read_to_string(run_dir.join("metrics.json")).unwrap())
                .unwrap();
        assert_eq!(stored.len(), 2);
        assert!(run_dir.join("artifacts/model/model.bin").exists());
        assert!(run_dir.join("artifacts/model/input_example.json").exists());
        let meta = fs::read_to_string(run_dir.join("meta.json")).unwrap();
        assert!(meta.contains("FINISHED"));
    }

    #[test]
    fn registry_is_unavailable() {
        let dir = tempdir().unwrap();
        let store = FileTrackingStore::open(dir.path()).unwrap();
        let run = store.start_run("wine").unwrap();
        assert!(store.is_local());
        assert!(store.register_model(&run, "model", "ElasticNet_model").is_err());
    }
}
