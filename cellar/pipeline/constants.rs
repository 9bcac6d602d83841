/// General configuration document.
pub const CONFIG_FILE_PATH: &str = "config/config.yaml";
/// Hyperparameter document.
pub const PARAMS_FILE_PATH: &str = "params.yaml";
/// Dataset schema document.
pub const SCHEMA_FILE_PATH: &str = "schema.yaml";
/// Default JSON-lines log file.
pub const LOG_FILE_PATH: &str = "logs/app_logs.jsonl";
/// Default run ledger.
pub const RUN_MANIFEST_PATH: &str = "logs/runs/index.jsonl";
/// Environment variable carrying the tracking sink URI.
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";
/// Column appended to the predictions log.
pub const PREDICTION_COLUMN: &str = "prediction";
/// Split file names written under the transformation root.
pub const TRAIN_FILE_NAME: &str = "train.csv";
/// See [`TRAIN_FILE_NAME`].
pub const TEST_FILE_NAME: &str = "test.csv";
