use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    entity::DataValidationConfig,
    error::{PipelineError, Result},
    regression::table::Table,
    telemetry::PipelineTelemetry,
};

/// Persisted gate between validation and splitting; on disk it is the one-line YAML
/// document `Validation Status: True`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ValidationStatus {
    #[serde(rename = "Validation Status")]
    status: bool,
}

/// Writes the status marker, replacing previous content.
pub fn write_validation_status(path: impl AsRef<Path>, passed: bool) -> std::io::Result<()> {
    let label = if passed { "True" } else { "False" };
    fs::write(path, format!("Validation Status: {label}"))
}

/// Reads the status marker back.
pub fn read_validation_status(path: impl AsRef<Path>) -> anyhow::Result<bool> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading validation status {}", path.display()))?;
    let parsed: ValidationStatus = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing validation status {}", path.display()))?;
    Ok(parsed.status)
}

/// Compares the extracted dataset's header with the declared schema.
#[derive(Debug, Clone)]
pub struct DataValidation {
    config: DataValidationConfig,
    telemetry: PipelineTelemetry,
}

impl DataValidation {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: DataValidationConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            config,
            telemetry: telemetry.scoped("data_validation"),
        }
    }

    /// Passes iff the header column set equals the schema column set exactly. The
    /// outcome is persisted either way; a dataset that cannot be read writes nothing.
    pub fn validate(&self) -> Result<bool> {
        let data_path = &self.config.unzip_data_dir;
        let table = Table::read_csv(data_path).map_err(|err| {
            self.telemetry.error(
                "dataset unreadable",
                json!({ "path": data_path, "error": err.to_string() }),
            );
            PipelineError::DataRead {
                path: data_path.clone(),
                message: err.to_string(),
            }
        })?;
        let found: std::collections::BTreeSet<String> = table.headers().iter().cloned().collect();
        let expected = self.config.schema.column_set();
        let passed = found == expected;
        if passed {
            self.telemetry
                .info("column validation passed", json!({ "columns": found.len() }));
        } else {
            let missing: Vec<_> = expected.difference(&found).collect();
            let unexpected: Vec<_> = found.difference(&expected).collect();
            self.telemetry.warn("column validation failed", json!({}));
            if !missing.is_empty() {
                self.telemetry
                    .debug("missing columns", json!({ "columns": missing }));
            }
            if !unexpected.is_empty() {
                self.telemetry
                    .debug("unexpected columns", json!({ "columns": unexpected }));
            }
        }
        let status_file = &self.config.status_file;
        write_validation_status(status_file, passed).map_err(|err| {
            PipelineError::ArtifactWrite {
                path: status_file.clone(),
                message: err.to_string(),
            }
        })?;
        self.telemetry.info(
            "validation status written",
            json!({ "path": status_file, "passed": passed }),
        );
        Ok(passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Schema;
    use indexmap::IndexMap;
    use tempfile::tempdir;

    fn config(root: &Path, columns: &[&str]) -> DataValidationConfig {
        let columns: IndexMap<String, String> = columns
            .iter()
            .map(|name| ((*name).to_string(), "float64".to_string()))
            .collect();
        DataValidationConfig {
            root_dir: root.to_path_buf(),
            unzip_data_dir: root.join("data.csv"),
            status_file: root.join("status.txt"),
            schema: Schema {
                columns,
                target_column: "target".into(),
            },
        }
    }

    #[test]
    fn matching_columns_in_any_order_pass() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path(), &["target", "f2", "f1"]);
        fs::write(&cfg.unzip_data_dir, "f1,f2,target\n1,2,3\n").unwrap();
        let stage = DataValidation::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        assert!(stage.validate().unwrap());
        assert_eq!(
            fs::read_to_string(&cfg.status_file).unwrap(),
            "Validation Status: True"
        );
        assert!(read_validation_status(&cfg.status_file).unwrap());
    }

    #[test]
    fn extra_or_missing_columns_fail() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path(), &["f1", "f2", "f3", "target"]);
        fs::write(&cfg.unzip_data_dir, "f1,f2,target\n1,2,3\n").unwrap();
        let stage = DataValidation::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        assert!(!stage.validate().unwrap());
        assert_eq!(
            fs::read_to_string(&cfg.status_file).unwrap(),
            "Validation Status: False"
        );
        assert!(!read_validation_status(&cfg.status_file).unwrap());
    }

    #[test]
    fn unreadable_dataset_writes_no_status() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path(), &["f1", "target"]);
        let stage = DataValidation::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        assert!(matches!(
            stage.validate(),
            Err(PipelineError::DataRead { .. })
        ));
        assert!(!cfg.status_file.exists());
    }

    #[test]
    fn garbled_status_is_an_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("status.txt");
        fs::write(&path, "Validation Status: maybe").unwrap();
        assert!(read_validation_status(&path).is_err());
        assert!(read_validation_status(tmp.path().join("absent.txt")).is_err());
    }
}
