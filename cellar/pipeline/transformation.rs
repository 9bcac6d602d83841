use std::path::PathBuf;

use serde_json::json;

use crate::{
    entity::DataTransformationConfig,
    error::{PipelineError, Result},
    regression::{func::train_test_split, table::Table},
    telemetry::PipelineTelemetry,
    validation::read_validation_status,
};

/// Splits the validated dataset into train and test CSVs.
#[derive(Debug, Clone)]
pub struct DataTransformation {
    config: DataTransformationConfig,
    telemetry: PipelineTelemetry,
}

impl DataTransformation {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: DataTransformationConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            config,
            telemetry: telemetry.scoped("data_transformation"),
        }
    }

    /// Writes `train.csv` and `test.csv` under the stage root and returns their paths.
    ///
    /// Nothing is written unless the validation marker reads `True`.
    pub fn split(&self, test_fraction: f64, seed: u64) -> Result<(PathBuf, PathBuf)> {
        let status_file = &self.config.status_file;
        match read_validation_status(status_file) {
            Ok(true) => {}
            Ok(false) => {
                return Err(self.gate_closed("validation status is False".into()));
            }
            Err(err) => {
                return Err(self.gate_closed(format!("{err:#}")));
            }
        }

        let data_path = &self.config.data_path;
        let table = Table::read_csv(data_path).map_err(|err| PipelineError::DataRead {
            path: data_path.clone(),
            message: err.to_string(),
        })?;
        if table.is_empty() {
            return Err(PipelineError::DataRead {
                path: data_path.clone(),
                message: "dataset has no rows".into(),
            });
        }
        let indices = train_test_split(table.len(), test_fraction, seed)
            .map_err(|err| PipelineError::Config(err.to_string()))?;
        let train = table.take_rows(&indices.train);
        let test = table.take_rows(&indices.test);

        let train_path = self.config.train_path();
        let test_path = self.config.test_path();
        for (partition, path) in [(&train, &train_path), (&test, &test_path)] {
            partition
                .write_csv(path)
                .map_err(|err| PipelineError::ArtifactWrite {
                    path: path.clone(),
                    message: err.to_string(),
                })?;
        }
        self.telemetry.info(
            "dataset split",
            json!({
                "train_rows": train.len(),
                "test_rows": test.len(),
                "test_fraction": test_fraction,
                "seed": seed,
            }),
        );
        Ok((train_path, test_path))
    }

    /// Splits with the configured fraction and seed.
    pub fn run(&self) -> Result<(PathBuf, PathBuf)> {
        self.split(self.config.test_size, self.config.random_state)
    }

    fn gate_closed(&self, reason: String) -> PipelineError {
        self.telemetry.error(
            "data schema is not valid, split skipped",
            json!({ "status_file": self.config.status_file, "reason": reason }),
        );
        PipelineError::SchemaInvalid {
            status_file: self.config.status_file.clone(),
            reason,
        }
    }
}
