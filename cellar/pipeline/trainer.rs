use serde_json::json;

use crate::{
    entity::ModelTrainerConfig,
    error::{PipelineError, Result},
    regression::{
        elastic_net::{ElasticNet, ElasticNetParams},
        func::mean_squared_error,
        reporter::TrainingReport,
        table::Table,
    },
    telemetry::PipelineTelemetry,
};

/// Fits the ElasticNet model on the training split and persists it.
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: ModelTrainerConfig,
    telemetry: PipelineTelemetry,
}

impl ModelTrainer {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: ModelTrainerConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            config,
            telemetry: telemetry.scoped("model_trainer"),
        }
    }

    /// Loads both splits, fits on the training rows, and writes the model to
    /// `root_dir/model_name`.
    pub fn train(&self) -> Result<TrainingReport> {
        let result = self.fit_and_persist();
        if let Err(err) = &result {
            self.telemetry
                .error("training failed", json!({ "error": err.to_string() }));
        }
        result
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit_and_persist(&self) -> Result<TrainingReport> {
        let cfg = &self.config;
        let train = load(&cfg.train_data_path)?;
        let test = load(&cfg.test_data_path)?;
        self.telemetry.debug(
            "splits loaded",
            json!({ "train_rows": train.len(), "test_rows": test.len() }),
        );

        let (names, x, y) = train
            .features_and_target(&cfg.target_column)
            .map_err(|err| {
                PipelineError::Training(format!("{}: {err}", cfg.train_data_path.display()))
            })?;
        let params = ElasticNetParams {
            alpha: cfg.alpha,
            l1_ratio: cfg.l1_ratio,
        };
        let model = ElasticNet::new(params)
            .fit(names, &x, &y)
            .map_err(|err| PipelineError::Training(err.to_string()))?;

        let fitted = model
            .predict(&x)
            .map_err(|err| PipelineError::Training(err.to_string()))?;
        let train_rmse = mean_squared_error(
            y.as_slice().unwrap_or_default(),
            fitted.as_slice().unwrap_or_default(),
        )
        .sqrt();

        let model_path = cfg.model_path();
        model
            .save(&model_path)
            .map_err(|err| PipelineError::Training(format!("persisting model: {err}")))?;

        let report = TrainingReport {
            model: "ElasticNet".into(),
            alpha: cfg.alpha,
            l1_ratio: cfg.l1_ratio,
            train_rows: x.nrows(),
            features: x.ncols(),
            iterations: model.iterations,
            train_rmse,
        };
        self.telemetry.info(
            &report.summary(),
            json!({ "model_path": model_path, "intercept": model.intercept }),
        );
        Ok(report)
    }
}

fn load(path: &std::path::Path) -> Result<Table> {
    Table::read_csv(path)
        .map_err(|err| PipelineError::Training(format!("loading {}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::elastic_net::ElasticNetModel;
    use std::{fmt::Write as _, fs, path::Path};
    use tempfile::tempdir;

    fn config(root: &Path) -> ModelTrainerConfig {
        ModelTrainerConfig {
            root_dir: root.join("model_trainer"),
            train_data_path: root.join("train.csv"),
            test_data_path: root.join("test.csv"),
            model_name: "model.bin".into(),
            alpha: 0.2,
            l1_ratio: 0.1,
            target_column: "target".into(),
        }
    }

    fn write_split(path: &Path, rows: std::ops::Range<usize>) {
        let mut content = String::from("f1,f2,target\n");
        for idx in rows {
            let f1 = idx as f64 * 0.5;
            let f2 = (idx % 5) as f64;
            writeln!(content, "{f1},{f2},{}", 1.5 * f1 - 0.5 * f2 + 2.0).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn trains_and_persists_model() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path());
        write_split(&cfg.train_data_path, 0..40);
        write_split(&cfg.test_data_path, 40..50);
        let trainer = ModelTrainer::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        let report = trainer.train().unwrap();
        assert_eq!(report.train_rows, 40);
        assert_eq!(report.features, 2);
        assert!(report.train_rmse.is_finite());

        let model = ElasticNetModel::load(cfg.model_path()).unwrap();
        assert_eq!(model.feature_names(), ["f1", "f2"]);
        let predictions = model.predict_rows(&[vec![1.0, 2.0]]).unwrap();
        assert!(predictions[0].is_finite());
    }

    #[test]
    fn missing_target_is_a_training_error() {
        let tmp = tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.target_column = "quality".into();
        write_split(&cfg.train_data_path, 0..10);
        write_split(&cfg.test_data_path, 10..12);
        let trainer = ModelTrainer::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        assert!(matches!(trainer.train(), Err(PipelineError::Training(_))));
        assert!(!cfg.model_path().exists());
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let tmp = tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.alpha = -1.0;
        write_split(&cfg.train_data_path, 0..10);
        write_split(&cfg.test_data_path, 10..12);
        let trainer = ModelTrainer::new(cfg, &PipelineTelemetry::disabled("test"));
        let err = trainer.train().unwrap_err();
        assert!(err.to_string().contains("alpha"));
    }

    #[test]
    fn missing_split_is_a_training_error() {
        let tmp = tempdir().unwrap();
        let cfg = config(tmp.path());
        let trainer = ModelTrainer::new(cfg, &PipelineTelemetry::disabled("test"));
        assert!(matches!(trainer.train(), Err(PipelineError::Training(_))));
    }
}
