use std::fs;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use shared_tracking::{open_sink, ModelArtifact, RunHandle, RunStatus, TrackingSink, TrackingUri};

use crate::{
    entity::ModelEvaluationConfig,
    error::{PipelineError, Result},
    regression::{
        elastic_net::ElasticNetModel, func::regression_metrics, reporter::MetricsReport,
        table::Table,
    },
    telemetry::PipelineTelemetry,
};

const MODEL_ARTIFACT_PATH: &str = "model";

/// RMSE, MAE and R² for paired observations.
pub fn eval_metrics(actual: &[f64], predicted: &[f64]) -> Result<MetricsReport> {
    if actual.is_empty() {
        return Err(PipelineError::Evaluation("no observations to score".into()));
    }
    if actual.len() != predicted.len() {
        return Err(PipelineError::Evaluation(format!(
            "{} observations but {} predictions",
            actual.len(),
            predicted.len()
        )));
    }
    Ok(regression_metrics(actual, predicted))
}

/// Scores the persisted model on the test split and records the run.
#[derive(Debug, Clone)]
pub struct ModelEvaluation {
    config: ModelEvaluationConfig,
    telemetry: PipelineTelemetry,
}

impl ModelEvaluation {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: ModelEvaluationConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            config,
            telemetry: telemetry.scoped("model_evaluation"),
        }
    }

    /// Evaluates and forwards to the sink selected by the configured tracking URI.
    pub fn evaluate(&self) -> Result<MetricsReport> {
        let uri = TrackingUri::parse(self.config.tracking_uri.as_deref()).map_err(|source| {
            PipelineError::Tracking {
                uri: self.uri_label(),
                source,
            }
        })?;
        let sink = open_sink(&uri).map_err(|source| PipelineError::Tracking {
            uri: self.uri_label(),
            source,
        })?;
        self.telemetry
            .debug("tracking sink opened", json!({ "scheme": uri.scheme() }));
        self.evaluate_with_sink(sink.as_ref())
    }

    /// Evaluates, writes the metrics JSON, then records params, metrics and the model on
    /// `sink`. Any sink failure fails the stage.
    pub fn evaluate_with_sink(&self, sink: &dyn TrackingSink) -> Result<MetricsReport> {
        let cfg = &self.config;
        let test = Table::read_csv(&cfg.test_data_path).map_err(|err| PipelineError::DataRead {
            path: cfg.test_data_path.clone(),
            message: err.to_string(),
        })?;
        let model = ElasticNetModel::load(&cfg.model_path).map_err(|err| {
            PipelineError::DataRead {
                path: cfg.model_path.clone(),
                message: err.to_string(),
            }
        })?;
        let mut columns = model.feature_names().to_vec();
        columns.push(cfg.target_column.clone());
        let (names, x, y) = test
            .select(&columns)
            .and_then(|table| table.features_and_target(&cfg.target_column))
            .map_err(|err| PipelineError::DataRead {
                path: cfg.test_data_path.clone(),
                message: err.to_string(),
            })?;
        let predicted = model
            .predict(&x)
            .map_err(|err| PipelineError::Evaluation(err.to_string()))?;
        let report = eval_metrics(&y.to_vec(), &predicted.to_vec())?;

        let body = serde_json::to_vec_pretty(&report)
            .map_err(|err| PipelineError::Evaluation(err.to_string()))?;
        fs::write(&cfg.metric_file_path, body).map_err(|source| PipelineError::MetricWrite {
            path: cfg.metric_file_path.clone(),
            source,
        })?;
        self.telemetry.info(
            &report.summary(),
            json!({ "metrics_path": cfg.metric_file_path }),
        );

        let example: Map<String, Value> = names
            .iter()
            .zip(x.row(0).iter())
            .map(|(name, value)| (name.clone(), json!(value)))
            .collect();
        self.track(sink, &report, Value::Object(example))
            .map_err(|source| {
                self.telemetry.error(
                    "tracking failed",
                    json!({ "uri": self.uri_label(), "error": format!("{source:#}") }),
                );
                PipelineError::Tracking {
                    uri: self.uri_label(),
                    source,
                }
            })?;
        Ok(report)
    }

    fn track(
        &self,
        sink: &dyn TrackingSink,
        report: &MetricsReport,
        input_example: Value,
    ) -> anyhow::Result<()> {
        let run = sink.start_run(&self.config.experiment_name)?;
        let outcome = self.record(sink, &run, report, input_example);
        match outcome {
            Ok(()) => sink.end_run(&run, RunStatus::Finished),
            Err(err) => {
                if let Err(close_err) = sink.end_run(&run, RunStatus::Failed) {
                    self.telemetry.warn(
                        "could not mark tracking run as failed",
                        json!({ "run_id": run.run_id, "error": format!("{close_err:#}") }),
                    );
                }
                Err(err)
            }
        }
    }

    fn record(
        &self,
        sink: &dyn TrackingSink,
        run: &RunHandle,
        report: &MetricsReport,
        input_example: Value,
    ) -> anyhow::Result<()> {
        let cfg = &self.config;
        let mut params = IndexMap::new();
        params.insert("alpha".to_string(), cfg.params.alpha.to_string());
        params.insert("l1_ratio".to_string(), cfg.params.l1_ratio.to_string());
        sink.log_params(run, &params)?;

        let mut metrics = IndexMap::new();
        metrics.insert("rmse".to_string(), report.rmse);
        metrics.insert("mae".to_string(), report.mae);
        metrics.insert("r2".to_string(), report.r2);
        sink.log_metrics(run, &metrics)?;

        sink.log_model(
            run,
            &ModelArtifact {
                artifact_path: MODEL_ARTIFACT_PATH.into(),
                file: cfg.model_path.clone(),
                input_example,
            },
        )?;
        if sink.is_local() {
            self.telemetry.debug(
                "local tracking store, model registration skipped",
                json!({ "run_id": run.run_id }),
            );
        } else {
            sink.register_model(run, MODEL_ARTIFACT_PATH, &cfg.registered_model_name)?;
            self.telemetry.info(
                "model registered",
                json!({ "name": cfg.registered_model_name, "run_id": run.run_id }),
            );
        }
        Ok(())
    }

    fn uri_label(&self) -> String {
        self.config
            .tracking_uri
            .clone()
            .unwrap_or_else(|| shared_tracking::DEFAULT_LOCAL_STORE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::elastic_net::{ElasticNet, ElasticNetParams};
    use ndarray::array;
    use shared_tracking::{MemoryTrackingSink, TrackingEvent};
    use std::path::Path;
    use tempfile::tempdir;

    const PARAMS: ElasticNetParams = ElasticNetParams {
        alpha: 0.01,
        l1_ratio: 0.5,
    };

    fn fixture(root: &Path) -> ModelEvaluationConfig {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        let y = array![2.0, 5.0, 6.0, 9.0];
        let model = ElasticNet::new(PARAMS)
            .fit(vec!["f1".into(), "f2".into()], &x, &y)
            .unwrap();
        let model_path = root.join("model.bin");
        model.save(&model_path).unwrap();
        let test_path = root.join("test.csv");
        fs::write(&test_path, "f2,target,f1\n0,3,1.5\n1,7,3\n").unwrap();
        ModelEvaluationConfig {
            root_dir: root.to_path_buf(),
            test_data_path: test_path,
            model_path,
            metric_file_path: root.join("metrics.json"),
            target_column: "target".into(),
            params: PARAMS,
            tracking_uri: None,
            experiment_name: "wine-quality".into(),
            registered_model_name: "ElasticNet_model".into(),
        }
    }

    #[test]
    fn metrics_reject_empty_or_mismatched_inputs() {
        assert!(eval_metrics(&[], &[]).is_err());
        assert!(eval_metrics(&[1.0], &[1.0, 2.0]).is_err());
        let report = eval_metrics(&[1.0, 2.0], &[1.0, 2.0]).unwrap();
        assert!(report.rmse.abs() < f64::EPSILON);
    }

    #[test]
    fn local_sink_records_run_without_registration() {
        let tmp = tempdir().unwrap();
        let cfg = fixture(tmp.path());
        let stage = ModelEvaluation::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        let sink = MemoryTrackingSink::local();
        let report = stage.evaluate_with_sink(&sink).unwrap();
        assert!(report.rmse >= 0.0 && report.mae >= 0.0 && report.r2 <= 1.0);

        let written: MetricsReport =
            serde_json::from_str(&fs::read_to_string(&cfg.metric_file_path).unwrap()).unwrap();
        assert!((written.rmse - report.rmse).abs() < 1e-12);
        assert!((written.r2 - report.r2).abs() < 1e-12);

        let events = sink.snapshot();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], TrackingEvent::RunStarted { .. }));
        assert!(matches!(&events[1], TrackingEvent::Params(p) if p["alpha"] == "0.01"));
        assert!(matches!(&events[2], TrackingEvent::Metrics(m) if m.len() == 3));
        assert!(matches!(&events[3], TrackingEvent::Model { artifact_path, .. } if artifact_path == "model"));
        assert_eq!(events[4], TrackingEvent::RunEnded(RunStatus::Finished));
    }

    #[test]
    fn remote_sink_registers_model() {
        let tmp = tempdir().unwrap();
        let stage = ModelEvaluation::new(fixture(tmp.path()), &PipelineTelemetry::disabled("test"));
        let sink = MemoryTrackingSink::remote();
        stage.evaluate_with_sink(&sink).unwrap();
        assert!(sink.snapshot().contains(&TrackingEvent::Registered {
            name: "ElasticNet_model".into()
        }));
    }

    #[test]
    fn sink_failure_fails_the_stage_and_closes_the_run() {
        let tmp = tempdir().unwrap();
        let cfg = fixture(tmp.path());
        let stage = ModelEvaluation::new(cfg.clone(), &PipelineTelemetry::disabled("test"));
        let sink = MemoryTrackingSink::failing();
        assert!(matches!(
            stage.evaluate_with_sink(&sink),
            Err(PipelineError::Tracking { .. })
        ));
        assert!(cfg.metric_file_path.exists());
        assert_eq!(
            sink.snapshot().last(),
            Some(&TrackingEvent::RunEnded(RunStatus::Failed))
        );
    }

    #[test]
    fn file_store_uri_writes_run_layout() {
        let tmp = tempdir().unwrap();
        let mut cfg = fixture(tmp.path());
        let store = tmp.path().join("mlruns");
        cfg.tracking_uri = Some(format!("file://{}", store.display()));
        let stage = ModelEvaluation::new(cfg, &PipelineTelemetry::disabled("test"));
        stage.evaluate().unwrap();
        let experiment = store.join("wine-quality");
        let runs: Vec<_> = fs::read_dir(&experiment).unwrap().collect();
        assert_eq!(runs.len(), 1);
        let run_dir = runs[0].as_ref().unwrap().path();
        assert!(run_dir.join("metrics.json").exists());
        assert!(run_dir.join("artifacts/model/model.bin").exists());
    }

    #[test]
    fn missing_model_is_a_read_error() {
        let tmp = tempdir().unwrap();
        let mut cfg = fixture(tmp.path());
        cfg.model_path = tmp.path().join("absent.bin");
        let stage = ModelEvaluation::new(cfg, &PipelineTelemetry::disabled("test"));
        assert!(matches!(
            stage.evaluate_with_sink(&MemoryTrackingSink::local()),
            Err(PipelineError::DataRead { .. })
        ));
    }
}
