use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a pipeline run in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Stages are executing.
    Running,
    /// Every stage succeeded.
    Completed,
    /// A stage failed; later stages were not attempted.
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// One line of the run ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifestEntry {
    /// Unique run id (`run-<uuid>`).
    pub run_id: String,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// General configuration document used.
    pub config: PathBuf,
    /// Stages scheduled, in order.
    pub stages: Vec<String>,
    /// Current state.
    pub status: RunState,
    /// Stage that failed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// Error text of the failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunManifestEntry {
    /// New entry in the `running` state.
    #[must_use]
    pub fn new(config: PathBuf, stages: Vec<String>) -> Self {
        Self {
            run_id: format!("run-{}", Uuid::new_v4()),
            started_at: Utc::now(),
            config,
            stages,
            status: RunState::Running,
            failed_stage: None,
            error: None,
            finished_at: None,
        }
    }
}

/// Append-only JSON-lines ledger; status changes rewrite the file in place.
#[derive(Debug, Clone)]
pub struct RunManifest {
    path: PathBuf,
}

impl RunManifest {
    /// Ledger at `path`; nothing is created until the first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry.
    pub fn append(&self, entry: &RunManifestEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening manifest {}", self.path.display()))?;
        serde_json::to_writer(&mut file, entry)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Every entry in append order; a missing ledger reads as empty.
    pub fn read(&self) -> Result<Vec<RunManifestEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("opening manifest {}", self.path.display()))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: RunManifestEntry = serde_json::from_str(&line).with_context(|| {
                format!("parsing manifest {} line {}", self.path.display(), idx + 1)
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Entry with the given id.
    pub fn find(&self, run_id: &str) -> Result<Option<RunManifestEntry>> {
        Ok(self.read()?.into_iter().find(|entry| entry.run_id == run_id))
    }

    /// Applies `change` to the matching entry and rewrites the ledger. Returns false when
    /// no entry matched.
    pub fn update<F>(&self, run_id: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&mut RunManifestEntry),
    {
        let mut entries = self.read()?;
        let Some(entry) = entries.iter_mut().find(|entry| entry.run_id == run_id) else {
            return Ok(false);
        };
        change(entry);
        let mut file = File::create(&self.path)
            .with_context(|| format!("rewriting manifest {}", self.path.display()))?;
        for entry in &entries {
            serde_json::to_writer(&mut file, entry)?;
            file.write_all(b"\n")?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_ledger_reads_empty() {
        let dir = tempdir().unwrap();
        let manifest = RunManifest::new(dir.path().join("runs/index.jsonl"));
        assert!(manifest.read().unwrap().is_empty());
    }

    #[test]
    fn append_then_update_in_place() {
        let dir = tempdir().unwrap();
        let manifest = RunManifest::new(dir.path().join("runs/index.jsonl"));
        let first = RunManifestEntry::new("config.yaml".into(), vec!["ingest".into()]);
        let second = RunManifestEntry::new("config.yaml".into(), vec!["train".into()]);
        manifest.append(&first).unwrap();
        manifest.append(&second).unwrap();

        let updated = manifest
            .update(&first.run_id, |entry| {
                entry.status = RunState::Failed;
                entry.failed_stage = Some("ingest".into());
                entry.finished_at = Some(Utc::now());
            })
            .unwrap();
        assert!(updated);
        assert!(!manifest.update("run-unknown", |_| {}).unwrap());

        let entries = manifest.read().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, RunState::Failed);
        assert_eq!(entries[1].status, RunState::Running);
        let found = manifest.find(&second.run_id).unwrap().unwrap();
        assert_eq!(found.stages, vec!["train"]);
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&RunState::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert_eq!(RunState::Running.to_string(), "running");
    }
}
