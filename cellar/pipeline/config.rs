use std::{
    env, fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::{
    constants::{CONFIG_FILE_PATH, PARAMS_FILE_PATH, SCHEMA_FILE_PATH, TRACKING_URI_ENV},
    entity::{
        DataIngestionConfig, DataTransformationConfig, DataValidationConfig,
        ModelEvaluationConfig, ModelPredictionConfig, ModelTrainerConfig, Schema,
    },
    error::{PipelineError, Result},
    regression::elastic_net::ElasticNetParams,
    telemetry::PipelineTelemetry,
};

const DEFAULT_EXPERIMENT: &str = "wine-quality";
const DEFAULT_REGISTERED_MODEL: &str = "ElasticNet_model";

/// Locations of the three declarative documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    /// General configuration (`config/config.yaml`).
    pub config: PathBuf,
    /// Hyperparameters (`params.yaml`).
    pub params: PathBuf,
    /// Dataset schema (`schema.yaml`).
    pub schema: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            config: PathBuf::from(CONFIG_FILE_PATH),
            params: PathBuf::from(PARAMS_FILE_PATH),
            schema: PathBuf::from(SCHEMA_FILE_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigDocument {
    artifacts_root: PathBuf,
    #[serde(default)]
    data_ingestion: Option<IngestionSection>,
    #[serde(default)]
    data_validation: Option<ValidationSection>,
    #[serde(default)]
    data_transformation: Option<TransformationSection>,
    #[serde(default)]
    model_trainer: Option<TrainerSection>,
    #[serde(default)]
    model_evaluation: Option<EvaluationSection>,
    #[serde(default)]
    model_prediction: Option<PredictionSection>,
}

#[derive(Debug, Clone, Deserialize)]
struct IngestionSection {
    root_dir: PathBuf,
    #[serde(rename = "source_URL", alias = "source_url")]
    source_url: String,
    local_data_file: PathBuf,
    unzip_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct ValidationSection {
    root_dir: PathBuf,
    unzip_data_dir: PathBuf,
    #[serde(rename = "STATUS_FILE", alias = "status_file")]
    status_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct TransformationSection {
    root_dir: PathBuf,
    data_path: PathBuf,
    #[serde(rename = "STATUS_FILE", alias = "status_file")]
    status_file: PathBuf,
    #[serde(default = "default_test_size")]
    test_size: f64,
    #[serde(default = "default_random_state")]
    random_state: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct TrainerSection {
    root_dir: PathBuf,
    train_data_path: PathBuf,
    test_data_path: PathBuf,
    model_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EvaluationSection {
    root_dir: PathBuf,
    test_data_path: PathBuf,
    model_path: PathBuf,
    #[serde(alias = "test_metric_file_path")]
    metric_file_path: PathBuf,
    #[serde(default = "default_experiment")]
    experiment_name: String,
    #[serde(default = "default_registered_model")]
    registered_model_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionSection {
    root_dir: PathBuf,
    model_path: PathBuf,
    predictions_file_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct ParamsDocument {
    #[serde(rename = "ElasticNet")]
    elastic_net: ElasticNetParams,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDocument {
    #[serde(rename = "COLUMNS")]
    columns: IndexMap<String, serde_yaml::Value>,
    #[serde(rename = "TARGET_COLUMN")]
    target: TargetSection,
}

#[derive(Debug, Clone, Deserialize)]
struct TargetSection {
    #[serde(alias = "target_column")]
    name: String,
}

const fn default_test_size() -> f64 {
    DataTransformationConfig::DEFAULT_TEST_SIZE
}

const fn default_random_state() -> u64 {
    DataTransformationConfig::DEFAULT_RANDOM_STATE
}

fn default_experiment() -> String {
    DEFAULT_EXPERIMENT.to_string()
}

fn default_registered_model() -> String {
    DEFAULT_REGISTERED_MODEL.to_string()
}

/// Loads the declarative documents and hands out one typed config per stage.
///
/// Construction parses all three documents up front and creates the artifacts root;
/// each accessor creates its stage directory and returns an owned value.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    paths: ConfigPaths,
    config: ConfigDocument,
    params: ParamsDocument,
    schema: Schema,
    telemetry: PipelineTelemetry,
}

impl ConfigurationManager {
    /// Parses the three documents and creates the artifacts root.
    pub fn new(
        config: impl AsRef<Path>,
        params: impl AsRef<Path>,
        schema: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::from_paths(&ConfigPaths {
            config: config.as_ref().to_path_buf(),
            params: params.as_ref().to_path_buf(),
            schema: schema.as_ref().to_path_buf(),
        })
    }

    /// Same as [`ConfigurationManager::new`] with a prepared path set.
    pub fn from_paths(paths: &ConfigPaths) -> Result<Self> {
        let config: ConfigDocument = read_document(&paths.config)?;
        let params: ParamsDocument = read_document(&paths.params)?;
        let schema_doc: SchemaDocument = read_document(&paths.schema)?;
        if schema_doc.columns.is_empty() {
            return Err(PipelineError::Config(format!(
                "{}: COLUMNS declares no columns",
                paths.schema.display()
            )));
        }
        if !schema_doc.columns.contains_key(&schema_doc.target.name) {
            return Err(PipelineError::Config(format!(
                "{}: target column `{}` is not declared in COLUMNS",
                paths.schema.display(),
                schema_doc.target.name
            )));
        }
        let schema = Schema {
            columns: schema_doc
                .columns
                .into_iter()
                .map(|(name, kind)| (name, type_label(&kind)))
                .collect(),
            target_column: schema_doc.target.name,
        };
        create_dir(&config.artifacts_root)?;
        Ok(Self {
            paths: paths.clone(),
            config,
            params,
            schema,
            telemetry: PipelineTelemetry::disabled("configuration"),
        })
    }

    /// Loads the documents from their default locations.
    pub fn from_defaults() -> Result<Self> {
        Self::from_paths(&ConfigPaths::default())
    }

    /// Attaches a telemetry handle used when stage directories are prepared.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: &PipelineTelemetry) -> Self {
        self.telemetry = telemetry.scoped("configuration");
        self
    }

    /// Document locations this manager was built from.
    #[must_use]
    pub const fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    /// Parsed schema.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Parsed hyperparameters.
    #[must_use]
    pub const fn params(&self) -> &ElasticNetParams {
        &self.params.elastic_net
    }

    /// Root directory shared by every stage.
    #[must_use]
    pub fn artifacts_root(&self) -> &Path {
        &self.config.artifacts_root
    }

    /// Ingestion settings.
    pub fn get_data_ingestion_config(&self) -> Result<DataIngestionConfig> {
        let section = self.section(self.config.data_ingestion.as_ref(), "data_ingestion")?;
        self.prepare(&section.root_dir)?;
        Ok(DataIngestionConfig {
            root_dir: section.root_dir.clone(),
            source_url: section.source_url.clone(),
            local_data_file: section.local_data_file.clone(),
            unzip_dir: section.unzip_dir.clone(),
        })
    }

    /// Validation settings, carrying the full schema.
    pub fn get_data_validation_config(&self) -> Result<DataValidationConfig> {
        let section = self.section(self.config.data_validation.as_ref(), "data_validation")?;
        self.prepare(&section.root_dir)?;
        Ok(DataValidationConfig {
            root_dir: section.root_dir.clone(),
            unzip_data_dir: section.unzip_data_dir.clone(),
            status_file: section.status_file.clone(),
            schema: self.schema.clone(),
        })
    }

    /// Split settings.
    pub fn get_data_transformation_config(&self) -> Result<DataTransformationConfig> {
        let section = self.section(
            self.config.data_transformation.as_ref(),
            "data_transformation",
        )?;
        self.prepare(&section.root_dir)?;
        Ok(DataTransformationConfig {
            root_dir: section.root_dir.clone(),
            data_path: section.data_path.clone(),
            status_file: section.status_file.clone(),
            test_size: section.test_size,
            random_state: section.random_state,
        })
    }

    /// Training settings with the ElasticNet hyperparameters.
    pub fn get_model_trainer_config(&self) -> Result<ModelTrainerConfig> {
        let section = self.section(self.config.model_trainer.as_ref(), "model_trainer")?;
        self.prepare(&section.root_dir)?;
        Ok(ModelTrainerConfig {
            root_dir: section.root_dir.clone(),
            train_data_path: section.train_data_path.clone(),
            test_data_path: section.test_data_path.clone(),
            model_name: section.model_name.clone(),
            alpha: self.params.elastic_net.alpha,
            l1_ratio: self.params.elastic_net.l1_ratio,
            target_column: self.schema.target_column.clone(),
        })
    }

    /// Evaluation settings; the tracking URI is read from the environment on each call.
    pub fn get_model_evaluation_config(&self) -> Result<ModelEvaluationConfig> {
        let section = self.section(self.config.model_evaluation.as_ref(), "model_evaluation")?;
        self.prepare(&section.root_dir)?;
        Ok(ModelEvaluationConfig {
            root_dir: section.root_dir.clone(),
            test_data_path: section.test_data_path.clone(),
            model_path: section.model_path.clone(),
            metric_file_path: section.metric_file_path.clone(),
            target_column: self.schema.target_column.clone(),
            params: self.params.elastic_net,
            tracking_uri: env::var(TRACKING_URI_ENV).ok(),
            experiment_name: section.experiment_name.clone(),
            registered_model_name: section.registered_model_name.clone(),
        })
    }

    /// Prediction settings with feature columns in schema order.
    pub fn get_model_prediction_config(&self) -> Result<ModelPredictionConfig> {
        let section = self.section(self.config.model_prediction.as_ref(), "model_prediction")?;
        self.prepare(&section.root_dir)?;
        Ok(ModelPredictionConfig {
            root_dir: section.root_dir.clone(),
            model_path: section.model_path.clone(),
            predictions_file_path: section.predictions_file_path.clone(),
            target_column: self.schema.target_column.clone(),
            feature_columns: self.schema.feature_columns(),
        })
    }

    fn section<'a, T>(&self, section: Option<&'a T>, name: &str) -> Result<&'a T> {
        section.ok_or_else(|| {
            PipelineError::Config(format!(
                "{}: missing section `{name}`",
                self.paths.config.display()
            ))
        })
    }

    fn prepare(&self, dir: &Path) -> Result<()> {
        create_dir(dir)?;
        self.telemetry
            .debug("stage directory ready", json!({ "path": dir }));
        Ok(())
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|err| PipelineError::Config(format!("{}: {err}", path.display())))?;
    if raw.trim().is_empty() {
        return Err(PipelineError::Config(format!(
            "{}: document is empty",
            path.display()
        )));
    }
    serde_yaml::from_str(&raw)
        .map_err(|err| PipelineError::Config(format!("{}: {err}", path.display())))
}

fn type_label(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(label) => label.clone(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|text| text.trim().to_string())
            .unwrap_or_default(),
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| {
        PipelineError::Config(format!("creating directory {}: {err}", dir.display()))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) const SCHEMA_YAML: &str = "\
COLUMNS:
  f1: float64
  f2: float64
  target: float64
TARGET_COLUMN:
  name: target
";

    pub(crate) const PARAMS_YAML: &str = "\
ElasticNet:
  alpha: 0.2
  l1_ratio: 0.1
";

    /// Writes a full set of documents rooted at `root` and returns their paths.
    pub(crate) fn write_documents(root: &Path, schema: &str) -> ConfigPaths {
        let artifacts = root.join("artifacts");
        let config = format!(
            "\
artifacts_root: {a}
data_ingestion:
  root_dir: {a}/data_ingestion
  source_URL: http://127.0.0.1:9/data.zip
  local_data_file: {a}/data_ingestion/data.zip
  unzip_dir: {a}/data_ingestion
data_validation:
  root_dir: {a}/data_validation
  unzip_data_dir: {a}/data_ingestion/data.csv
  STATUS_FILE: {a}/data_validation/status.txt
data_transformation:
  root_dir: {a}/data_transformation
  data_path: {a}/data_ingestion/data.csv
  STATUS_FILE: {a}/data_validation/status.txt
model_trainer:
  root_dir: {a}/model_trainer
  train_data_path: {a}/data_transformation/train.csv
  test_data_path: {a}/data_transformation/test.csv
  model_name: model.bin
model_evaluation:
  root_dir: {a}/model_evaluation
  test_data_path: {a}/data_transformation/test.csv
  model_path: {a}/model_trainer/model.bin
  test_metric_file_path: {a}/model_evaluation/metrics.json
model_prediction:
  root_dir: {a}/model_prediction
  model_path: {a}/model_trainer/model.bin
  predictions_file_path: {a}/model_prediction/predictions.csv
",
            a = artifacts.display()
        );
        let paths = ConfigPaths {
            config: root.join("config.yaml"),
            params: root.join("params.yaml"),
            schema: root.join("schema.yaml"),
        };
        fs::write(&paths.config, config).unwrap();
        fs::write(&paths.params, PARAMS_YAML).unwrap();
        fs::write(&paths.schema, schema).unwrap();
        paths
    }

    #[test]
    fn loads_documents_and_creates_stage_dirs() {
        let tmp = tempdir().unwrap();
        let paths = write_documents(tmp.path(), SCHEMA_YAML);
        let manager = ConfigurationManager::from_paths(&paths).unwrap();
        assert!(manager.artifacts_root().is_dir());

        let trainer = manager.get_model_trainer_config().unwrap();
        assert!(trainer.root_dir.is_dir());
        assert!((trainer.alpha - 0.2).abs() < f64::EPSILON);
        assert_eq!(trainer.target_column, "target");

        let split = manager.get_data_transformation_config().unwrap();
        assert!((split.test_size - 0.25).abs() < f64::EPSILON);
        assert_eq!(split.random_state, 42);

        let evaluation = manager.get_model_evaluation_config().unwrap();
        assert_eq!(evaluation.experiment_name, "wine-quality");
        assert_eq!(evaluation.registered_model_name, "ElasticNet_model");
        assert!(evaluation.metric_file_path.ends_with("metrics.json"));

        let prediction = manager.get_model_prediction_config().unwrap();
        assert_eq!(prediction.feature_columns, vec!["f1", "f2"]);
    }

    #[test]
    fn explicit_paths_expose_documents_and_params() {
        let tmp = tempdir().unwrap();
        let paths = write_documents(tmp.path(), SCHEMA_YAML);
        let manager =
            ConfigurationManager::new(&paths.config, &paths.params, &paths.schema).unwrap();
        assert_eq!(manager.paths(), &paths);
        assert_eq!(
            *manager.params(),
            ElasticNetParams {
                alpha: 0.2,
                l1_ratio: 0.1
            }
        );
    }

    #[test]
    fn defaults_resolve_relative_to_working_directory() {
        // the crate directory carries no config/config.yaml
        let err = ConfigurationManager::from_defaults().unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains(CONFIG_FILE_PATH)));
    }

    #[test]
    fn accepts_original_target_key() {
        let tmp = tempdir().unwrap();
        let schema = "COLUMNS:\n  a: int64\n  q: int64\nTARGET_COLUMN:\n  target_column: q\n";
        let paths = write_documents(tmp.path(), schema);
        let manager = ConfigurationManager::from_paths(&paths).unwrap();
        assert_eq!(manager.schema().target_column, "q");
        assert_eq!(manager.schema().columns["a"], "int64");
    }

    #[test]
    fn rejects_missing_and_empty_documents() {
        let tmp = tempdir().unwrap();
        let mut paths = write_documents(tmp.path(), SCHEMA_YAML);
        fs::write(&paths.params, "   \n").unwrap();
        let err = ConfigurationManager::from_paths(&paths).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("empty")));

        paths.params = tmp.path().join("absent.yaml");
        assert!(matches!(
            ConfigurationManager::from_paths(&paths),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn rejects_undeclared_target() {
        let tmp = tempdir().unwrap();
        let schema = "COLUMNS:\n  f1: float64\nTARGET_COLUMN:\n  name: quality\n";
        let paths = write_documents(tmp.path(), schema);
        let err = ConfigurationManager::from_paths(&paths).unwrap_err();
        assert!(err.to_string().contains("quality"));
    }

    #[test]
    fn missing_section_surfaces_on_access() {
        let tmp = tempdir().unwrap();
        let paths = write_documents(tmp.path(), SCHEMA_YAML);
        fs::write(
            &paths.config,
            format!("artifacts_root: {}\n", tmp.path().join("a").display()),
        )
        .unwrap();
        let manager = ConfigurationManager::from_paths(&paths).unwrap();
        let err = manager.get_model_trainer_config().unwrap_err();
        assert!(err.to_string().contains("model_trainer"));
    }
}
