use std::{collections::BTreeSet, path::PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{TEST_FILE_NAME, TRAIN_FILE_NAME},
    regression::elastic_net::ElasticNetParams,
};

/// Declared structure of the tabular dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Column name to declared type, in document order.
    pub columns: IndexMap<String, String>,
    /// Column holding the regression target.
    pub target_column: String,
}

impl Schema {
    /// Column names as an unordered set (validation compares sets).
    #[must_use]
    pub fn column_set(&self) -> BTreeSet<String> {
        self.columns.keys().cloned().collect()
    }

    /// Declared columns in document order, target excluded.
    #[must_use]
    pub fn feature_columns(&self) -> Vec<String> {
        self.columns
            .keys()
            .filter(|name| **name != self.target_column)
            .cloned()
            .collect()
    }
}

/// Settings for the ingestion stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIngestionConfig {
    /// Stage working directory.
    pub root_dir: PathBuf,
    /// Remote archive location.
    pub source_url: String,
    /// Where the downloaded archive is kept.
    pub local_data_file: PathBuf,
    /// Extraction directory.
    pub unzip_dir: PathBuf,
}

/// Settings for the validation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataValidationConfig {
    /// Stage working directory.
    pub root_dir: PathBuf,
    /// Extracted CSV to check.
    pub unzip_data_dir: PathBuf,
    /// Where the pass/fail marker is written.
    pub status_file: PathBuf,
    /// Expected columns.
    pub schema: Schema,
}

/// Settings for the split stage.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTransformationConfig {
    /// Stage working directory; receives `train.csv` and `test.csv`.
    pub root_dir: PathBuf,
    /// Validated dataset.
    pub data_path: PathBuf,
    /// Marker written by validation.
    pub status_file: PathBuf,
    /// Share of rows held out for testing.
    pub test_size: f64,
    /// Shuffle seed.
    pub random_state: u64,
}

impl DataTransformationConfig {
    /// Default held-out fraction.
    pub const DEFAULT_TEST_SIZE: f64 = 0.25;
    /// Default shuffle seed.
    pub const DEFAULT_RANDOM_STATE: u64 = 42;

    /// Training split location.
    #[must_use]
    pub fn train_path(&self) -> PathBuf {
        self.root_dir.join(TRAIN_FILE_NAME)
    }

    /// Test split location.
    #[must_use]
    pub fn test_path(&self) -> PathBuf {
        self.root_dir.join(TEST_FILE_NAME)
    }
}

/// Settings for the training stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTrainerConfig {
    /// Stage working directory.
    pub root_dir: PathBuf,
    /// Training split.
    pub train_data_path: PathBuf,
    /// Test split.
    pub test_data_path: PathBuf,
    /// File name of the persisted model inside `root_dir`.
    pub model_name: String,
    /// Regularization strength.
    pub alpha: f64,
    /// L1/L2 blend.
    pub l1_ratio: f64,
    /// Regression target.
    pub target_column: String,
}

impl ModelTrainerConfig {
    /// Where the fitted model is written.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.root_dir.join(&self.model_name)
    }
}

/// Settings for the evaluation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluationConfig {
    /// Stage working directory.
    pub root_dir: PathBuf,
    /// Test split.
    pub test_data_path: PathBuf,
    /// Persisted model.
    pub model_path: PathBuf,
    /// Metrics JSON destination.
    pub metric_file_path: PathBuf,
    /// Regression target.
    pub target_column: String,
    /// Hyperparameters forwarded to the tracking sink.
    pub params: ElasticNetParams,
    /// Raw `MLFLOW_TRACKING_URI` value, if any.
    pub tracking_uri: Option<String>,
    /// Experiment the run is recorded under.
    pub experiment_name: String,
    /// Registry name used by remote sinks.
    pub registered_model_name: String,
}

/// Settings for serving-time prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPredictionConfig {
    /// Stage working directory.
    pub root_dir: PathBuf,
    /// Persisted model.
    pub model_path: PathBuf,
    /// Append-only prediction log.
    pub predictions_file_path: PathBuf,
    /// Regression target.
    pub target_column: String,
    /// Input columns in schema order.
    pub feature_columns: Vec<String>,
}

impl ModelPredictionConfig {
    /// True when the model file exists.
    #[must_use]
    pub fn model_ready(&self) -> bool {
        self.model_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut columns = IndexMap::new();
        columns.insert("fixed acidity".to_string(), "float64".to_string());
        columns.insert("quality".to_string(), "int64".to_string());
        columns.insert("alcohol".to_string(), "float64".to_string());
        Schema {
            columns,
            target_column: "quality".into(),
        }
    }

    #[test]
    fn feature_columns_keep_order_and_drop_target() {
        assert_eq!(schema().feature_columns(), vec!["fixed acidity", "alcohol"]);
        assert_eq!(schema().column_set().len(), 3);
    }

    #[test]
    fn split_paths_live_under_root() {
        let config = DataTransformationConfig {
            root_dir: PathBuf::from("artifacts/data_transformation"),
            data_path: PathBuf::from("winequality-red.csv"),
            status_file: PathBuf::from("status.txt"),
            test_size: DataTransformationConfig::DEFAULT_TEST_SIZE,
            random_state: DataTransformationConfig::DEFAULT_RANDOM_STATE,
        };
        assert!(config.train_path().ends_with("data_transformation/train.csv"));
        assert!(config.test_path().ends_with("data_transformation/test.csv"));
    }
}
