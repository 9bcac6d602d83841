use serde_json::json;

use crate::{
    constants::PREDICTION_COLUMN,
    entity::ModelPredictionConfig,
    error::{PipelineError, Result},
    regression::{elastic_net::ElasticNetModel, table::Table},
    telemetry::PipelineTelemetry,
};

/// Serving-time predictor; reloads the model on every call.
#[derive(Debug, Clone)]
pub struct ModelPrediction {
    config: ModelPredictionConfig,
    telemetry: PipelineTelemetry,
}

impl ModelPrediction {
    /// Creates the predictor.
    #[must_use]
    pub fn new(config: ModelPredictionConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            config,
            telemetry: telemetry.scoped("model_prediction"),
        }
    }

    /// Feature columns expected in each row, in order.
    #[must_use]
    pub fn feature_columns(&self) -> &[String] {
        &self.config.feature_columns
    }

    /// Predicts every row and appends inputs plus predictions to the prediction log.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let result = self.predict_and_log(rows);
        if let Err(err) = &result {
            self.telemetry
                .error("prediction failed", json!({ "error": err.to_string() }));
        }
        result
    }

    fn predict_and_log(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let cfg = &self.config;
        if rows.is_empty() {
            return Err(PipelineError::Prediction("empty input batch".into()));
        }
        if !cfg.model_ready() {
            return Err(PipelineError::Prediction(format!(
                "loading model: {} does not exist, train the model first",
                cfg.model_path.display()
            )));
        }
        let model = ElasticNetModel::load(&cfg.model_path).map_err(|err| {
            PipelineError::Prediction(format!("loading model: {err}"))
        })?;
        let order = model_order(&cfg.feature_columns, model.feature_names())?;
        let reordered = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                if row.len() == order.len() {
                    Ok(order.iter().map(|&column| row[column]).collect())
                } else {
                    Err(PipelineError::Prediction(format!(
                        "row {idx} has {} values, expected {}",
                        row.len(),
                        order.len()
                    )))
                }
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;
        let predictions = model
            .predict_rows(&reordered)
            .map_err(|err| PipelineError::Prediction(err.to_string()))?;
        self.telemetry
            .debug("predictions generated", json!({ "rows": rows.len() }));

        let mut headers = cfg.feature_columns.clone();
        headers.push(PREDICTION_COLUMN.to_string());
        let logged: Vec<Vec<f64>> = rows
            .iter()
            .zip(&predictions)
            .map(|(row, prediction)| {
                let mut line = row.clone();
                line.push(*prediction);
                line
            })
            .collect();
        Table::from_numeric(headers, &logged)
            .append_csv(&cfg.predictions_file_path)
            .map_err(|err| PipelineError::Prediction(format!("writing prediction log: {err}")))?;
        self.telemetry.info(
            "predictions appended",
            json!({ "path": cfg.predictions_file_path, "rows": rows.len() }),
        );
        Ok(predictions)
    }
}

/// For each model input, its position in a schema-ordered row. The two column sets must
/// be identical.
fn model_order(schema: &[String], model: &[String]) -> Result<Vec<usize>> {
    let mismatch = || {
        PipelineError::Prediction(format!(
            "model was trained on {model:?} but the schema declares {schema:?}"
        ))
    };
    if schema.len() != model.len() {
        return Err(mismatch());
    }
    model
        .iter()
        .map(|name| {
            schema
                .iter()
                .position(|column| column == name)
                .ok_or_else(mismatch)
        })
        .collect()
}
