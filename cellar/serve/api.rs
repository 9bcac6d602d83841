use std::sync::Arc;

use axum::{routing::get, Router};

use crate::{handlers, state::AppState};

/// Builds the route table.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/train", get(handlers::train))
        .route("/predict", get(handlers::index).post(handlers::predict))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::{PREDICTION_FAILED, TRAINING_FAILED},
        ServerConfig,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use cellar_pipeline::{ConfigPaths, ElasticNet, ElasticNetParams, PipelineTelemetry, Table};
    use std::{fs, path::Path};
    use tempfile::tempdir;
    use tower::ServiceExt;

    /// Fits a two-feature model and writes it where the prediction config expects it.
    fn fit_fixture_model(model_path: &Path) {
        let table = Table::new(
            vec!["fixed acidity".into(), "alcohol".into(), "quality".into()],
            vec![
                vec!["1".into(), "9".into(), "5".into()],
                vec!["2".into(), "10".into(), "6".into()],
                vec!["3".into(), "11".into(), "6".into()],
                vec!["4".into(), "12".into(), "7".into()],
            ],
        );
        let (names, features, target) = table.features_and_target("quality").unwrap();
        ElasticNet::new(ElasticNetParams {
            alpha: 0.1,
            l1_ratio: 0.5,
        })
        .fit(names, &features, &target)
        .unwrap()
        .save(model_path)
        .unwrap();
    }

    fn documents(root: &Path) -> ConfigPaths {
        let a = root.join("artifacts");
        let config = format!(
            "\
artifacts_root: {a}
data_ingestion:
  root_dir: {a}/data_ingestion
  source_URL: http://127.0.0.1:9/data.zip
  local_data_file: {a}/data_ingestion/data.zip
  unzip_dir: {a}/data_ingestion
model_prediction:
  root_dir: {a}/model_prediction
  model_path: {a}/model_trainer/model.bin
  predictions_file_path: {a}/model_prediction/predictions.csv
",
            a = a.display()
        );
        let paths = ConfigPaths {
            config: root.join("config.yaml"),
            params: root.join("params.yaml"),
            schema: root.join("schema.yaml"),
        };
        fs::write(&paths.config, config).unwrap();
        fs::write(&paths.params, "ElasticNet:\n  alpha: 0.2\n  l1_ratio: 0.1\n").unwrap();
        fs::write(
            &paths.schema,
            "COLUMNS:\n  fixed acidity: float64\n  alcohol: float64\n  quality: int64\nTARGET_COLUMN:\n  name: quality\n",
        )
        .unwrap();
        paths
    }

    fn app(paths: ConfigPaths) -> Router {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            paths,
            manifest: None,
        };
        create_router(Arc::new(AppState::new(
            config,
            &PipelineTelemetry::disabled("test"),
        )))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_form(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn index_lists_schema_features() {
        let tmp = tempdir().unwrap();
        let response = app(documents(tmp.path()))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("name=\"fixed_acidity\""));
        assert!(html.contains("name=\"alcohol\""));
        assert!(!html.contains("name=\"quality\""));
    }

    #[tokio::test]
    async fn predict_renders_result_and_logs_row() {
        let tmp = tempdir().unwrap();
        let paths = documents(tmp.path());
        let artifacts = tmp.path().join("artifacts");
        fit_fixture_model(&artifacts.join("model_trainer/model.bin"));

        let response = app(paths)
            .oneshot(post_form("fixed_acidity=2.5&alcohol=10.5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Predicted quality"));

        let log =
            fs::read_to_string(artifacts.join("model_prediction/predictions.csv")).unwrap();
        assert!(log.starts_with("fixed acidity,alcohol,prediction\n2.5,10.5,"));
    }

    #[tokio::test]
    async fn predict_failures_degrade_to_generic_text() {
        let tmp = tempdir().unwrap();
        let paths = documents(tmp.path());

        let no_model = app(paths.clone())
            .oneshot(post_form("fixed_acidity=2.5&alcohol=10.5"))
            .await
            .unwrap();
        assert_eq!(no_model.status(), StatusCode::OK);
        assert_eq!(body_text(no_model).await, PREDICTION_FAILED);

        fit_fixture_model(&tmp.path().join("artifacts/model_trainer/model.bin"));
        let bad_number = app(paths)
            .oneshot(post_form("fixed_acidity=abc&alcohol=10.5"))
            .await
            .unwrap();
        assert_eq!(bad_number.status(), StatusCode::OK);
        assert_eq!(body_text(bad_number).await, PREDICTION_FAILED);
    }

    #[tokio::test]
    async fn failed_training_returns_generic_text() {
        let tmp = tempdir().unwrap();
        let response = app(documents(tmp.path()))
            .oneshot(Request::builder().uri("/train").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, TRAINING_FAILED);
    }
}
