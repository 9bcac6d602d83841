use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{rejection::FormRejection, State},
    response::Html,
    Form,
};
use cellar_pipeline::{
    ConfigurationManager, ModelPrediction, PipelineRunner, PipelineTelemetry, RunManifest,
};
use serde_json::json;

use crate::state::AppState;

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");
const RESULTS_TEMPLATE: &str = include_str!("../../templates/results.html");

/// Returned by `/train` when every stage succeeded.
pub const TRAINING_OK: &str = "Training Successful";
/// Returned by `/train` when any stage failed.
pub const TRAINING_FAILED: &str = "Training failed.";
/// Returned by `/predict` for any failure.
pub const PREDICTION_FAILED: &str = "Something went wrong during prediction.";
/// Returned by `/` when the schema cannot be loaded.
pub const FORM_UNAVAILABLE: &str = "Configuration unavailable.";

/// Form field name for a schema column.
#[must_use]
pub fn field_name(column: &str) -> String {
    column.replace(' ', "_")
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders the input form with one numeric field per feature column.
#[must_use]
pub fn render_form(features: &[String]) -> String {
    let fields: String = features
        .iter()
        .map(|column| {
            let name = escape(&field_name(column));
            format!(
                "    <label for=\"{name}\">{label}</label>\n    <input type=\"number\" step=\"any\" id=\"{name}\" name=\"{name}\" required>\n",
                label = escape(column)
            )
        })
        .collect();
    INDEX_TEMPLATE.replace("{{fields}}", &fields)
}

/// Renders the results page.
#[must_use]
pub fn render_result(prediction: f64) -> String {
    RESULTS_TEMPLATE.replace("{{prediction}}", &prediction.to_string())
}

/// `GET /` and `GET /predict`.
pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    match ConfigurationManager::from_paths(&state.paths) {
        Ok(config) => Html(render_form(&config.schema().feature_columns())),
        Err(err) => {
            state
                .telemetry
                .error("form unavailable", json!({ "error": err.to_string() }));
            Html(FORM_UNAVAILABLE.to_string())
        }
    }
}

/// `GET /train`: runs the whole pipeline and blocks until it finishes.
pub async fn train(State(state): State<Arc<AppState>>) -> &'static str {
    let paths = state.paths.clone();
    let manifest = state.manifest.clone();
    let telemetry = state.telemetry.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let mut runner = PipelineRunner::new(paths, &telemetry);
        if let Some(path) = manifest {
            runner = runner.with_manifest(RunManifest::new(path));
        }
        runner.run()
    })
    .await;
    match outcome {
        Ok(Ok(_)) => {
            state.telemetry.info("training triggered from web", json!({}));
            TRAINING_OK
        }
        Ok(Err(failure)) => {
            state.telemetry.error(
                "training failed",
                json!({ "stage": failure.stage.key(), "error": failure.source.to_string() }),
            );
            TRAINING_FAILED
        }
        Err(join) => {
            state
                .telemetry
                .error("training task aborted", json!({ "error": join.to_string() }));
            TRAINING_FAILED
        }
    }
}

/// `POST /predict`: reads one value per feature field, predicts, renders the result.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Html<String> {
    let outcome = match form {
        Ok(Form(fields)) => {
            let paths = state.paths.clone();
            let telemetry = state.telemetry.clone();
            tokio::task::spawn_blocking(move || predict_fields(&paths, &fields, &telemetry))
                .await
                .map_err(|err| err.to_string())
                .and_then(|result| result)
        }
        Err(rejection) => Err(rejection.to_string()),
    };
    match outcome {
        Ok(prediction) => Html(render_result(prediction)),
        Err(error) => {
            state
                .telemetry
                .error("prediction request failed", json!({ "error": error }));
            Html(PREDICTION_FAILED.to_string())
        }
    }
}

fn predict_fields(
    paths: &cellar_pipeline::ConfigPaths,
    fields: &HashMap<String, String>,
    telemetry: &PipelineTelemetry,
) -> Result<f64, String> {
    let config = ConfigurationManager::from_paths(paths).map_err(|err| err.to_string())?;
    let prediction_config = config
        .get_model_prediction_config()
        .map_err(|err| err.to_string())?;
    let row = prediction_config
        .feature_columns
        .iter()
        .map(|column| {
            let name = field_name(column);
            let raw = fields
                .get(&name)
                .ok_or_else(|| format!("missing field `{name}`"))?;
            raw.trim()
                .parse::<f64>()
                .map_err(|_| format!("field `{name}` is not a number: `{raw}`"))
        })
        .collect::<Result<Vec<f64>, String>>()?;
    let predictor = ModelPrediction::new(prediction_config, telemetry);
    let predictions = predictor
        .predict(&[row])
        .map_err(|err| err.to_string())?;
    predictions
        .first()
        .copied()
        .ok_or_else(|| "model returned no prediction".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_fields_replace_spaces() {
        let html = render_form(&["fixed acidity".to_string(), "pH".to_string()]);
        assert!(html.contains("name=\"fixed_acidity\""));
        assert!(html.contains("name=\"pH\""));
        assert!(html.contains(">fixed acidity</label>"));
        assert!(!html.contains("{{fields}}"));
    }

    #[test]
    fn result_page_embeds_prediction() {
        let html = render_result(5.5);
        assert!(html.contains("5.5"));
        assert!(!html.contains("{{prediction}}"));
    }
}
