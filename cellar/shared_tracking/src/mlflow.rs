use std::{env, fs};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use indexmap::IndexMap;
use reqwest::{
    blocking::{Client, RequestBuilder},
    Method, StatusCode,
};
use serde_json::{json, Value};

use crate::{ModelArtifact, RunHandle, RunStatus, TrackingSink};

/// Credentials sent to the tracking server.
#[derive(Debug, Clone)]
pub enum MlflowCredentials {
    /// HTTP basic auth.
    Basic {
        /// User name.
        username: String,
        /// Password or access token.
        password: String,
    },
    /// Bearer token.
    Token(String),
}

impl MlflowCredentials {
    /// Reads `MLFLOW_TRACKING_TOKEN` or the username/password pair from the environment.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        if let Ok(token) = env::var("MLFLOW_TRACKING_TOKEN") {
            return Some(Self::Token(token));
        }
        match (
            env::var("MLFLOW_TRACKING_USERNAME"),
            env::var("MLFLOW_TRACKING_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Some(Self::Basic { username, password }),
            _ => None,
        }
    }
}

/// Client for an MLflow-compatible REST tracking server.
#[derive(Debug, Clone)]
pub struct MlflowTrackingSink {
    base: String,
    client: Client,
    credentials: Option<MlflowCredentials>,
}

struct ApiResponse {
    status: StatusCode,
    body: Value,
}

impl ApiResponse {
    fn error_code(&self) -> Option<&str> {
        self.body.get("error_code").and_then(Value::as_str)
    }
}

impl MlflowTrackingSink {
    /// Creates a client for the given server base URL.
    pub fn new(base: impl Into<String>, credentials: Option<MlflowCredentials>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("cellar-tracking/0.1")
            .build()
            .context("building tracking http client")?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }

    /// Creates a client with credentials taken from the environment.
    pub fn from_env(base: impl Into<String>) -> Result<Self> {
        Self::new(base, MlflowCredentials::from_env())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/{}", self.base, endpoint.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(MlflowCredentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(MlflowCredentials::Token(token)) => request.bearer_auth(token),
            None => request,
        }
    }

    fn call(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let mut request = self.authorize(self.client.request(method, self.url(endpoint)));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .with_context(|| format!("tracking request {endpoint} failed"))?;
        let status = response.status();
        let text = response
            .text()
            .with_context(|| format!("reading tracking response from {endpoint}"))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse { status, body })
    }

    fn expect_ok(&self, method: Method, endpoint: &str, body: &Value) -> Result<Value> {
        let response = self.call(method, endpoint, Some(body))?;
        if !response.status.is_success() {
            bail!(
                "tracking server returned {} for {endpoint}: {}",
                response.status,
                response.body
            );
        }
        Ok(response.body)
    }

    fn experiment_id(&self, experiment: &str) -> Result<String> {
        let request = self.authorize(
            self.client
                .get(self.url("mlflow/experiments/get-by-name"))
                .query(&[("experiment_name", experiment)]),
        );
        let response = request
            .send()
            .context("tracking request experiments/get-by-name failed")?;
        if response.status().is_success() {
            let body: Value = response.json().context("parsing experiment lookup")?;
            if let Some(id) = body.pointer("/experiment/experiment_id").and_then(Value::as_str) {
                return Ok(id.to_string());
            }
        }
        let created = self.expect_ok(
            Method::POST,
            "mlflow/experiments/create",
            &json!({ "name": experiment }),
        )?;
        created
            .get("experiment_id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .with_context(|| format!("experiment '{experiment}' was not created"))
    }

    fn upload(&self, run: &RunHandle, relative: &str, bytes: Vec<u8>) -> Result<()> {
        let endpoint = format!(
            "mlflow-artifacts/artifacts/{}/{}/artifacts/{}",
            run.experiment_id, run.run_id, relative
        );
        let response = self
            .authorize(self.client.put(self.url(&endpoint)).body(bytes))
            .send()
            .with_context(|| format!("uploading artifact {relative}"))?;
        if !response.status().is_success() {
            bail!("artifact upload {relative} returned {}", response.status());
        }
        Ok(())
    }
}

/// Builds the `runs/log-batch` payload.
pub(crate) fn log_batch_body(
    run_id: &str,
    params: &IndexMap<String, String>,
    metrics: &IndexMap<String, f64>,
    timestamp_ms: i64,
) -> Value {
    json!({
        "run_id": run_id,
        "params": params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect::<Vec<_>>(),
        "metrics": metrics
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value, "timestamp": timestamp_ms, "step": 0 }))
            .collect::<Vec<_>>(),
    })
}

impl TrackingSink for MlflowTrackingSink {
    fn is_local(&self) -> bool {
        false
    }

    fn start_run(&self, experiment: &str) -> Result<RunHandle> {
        let experiment_id = self.experiment_id(experiment)?;
        let started_at = Utc::now();
        let body = self.expect_ok(
            Method::POST,
            "mlflow/runs/create",
            &json!({
                "experiment_id": experiment_id,
                "start_time": started_at.timestamp_millis(),
                "tags": [{ "key": "mlflow.source.name", "value": "cellar" }],
            }),
        )?;
        let run_id = body
            .pointer("/run/info/run_id")
            .and_then(Value::as_str)
            .context("runs/create response carries no run id")?;
        Ok(RunHandle {
            run_id: run_id.to_string(),
            experiment_id,
            experiment: experiment.to_string(),
            started_at,
        })
    }

    fn log_params(&self, run: &RunHandle, params: &IndexMap<String, String>) -> Result<()> {
        let body = log_batch_body(
            &run.run_id,
            params,
            &IndexMap::new(),
            Utc::now().timestamp_millis(),
        );
        self.expect_ok(Method::POST, "mlflow/runs/log-batch", &body)
            .map(drop)
    }

    fn log_metrics(&self, run: &RunHandle, metrics: &IndexMap<String, f64>) -> Result<()> {
        let body = log_batch_body(
            &run.run_id,
            &IndexMap::new(),
            metrics,
            Utc::now().timestamp_millis(),
        );
        self.expect_ok(Method::POST, "mlflow/runs/log-batch", &body)
            .map(drop)
    }

    fn log_model(&self, run: &RunHandle, artifact: &ModelArtifact) -> Result<()> {
        let file_name = artifact
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("model path {} has no file name", artifact.file.display()))?;
        let bytes = fs::read(&artifact.file)
            .with_context(|| format!("reading model {}", artifact.file.display()))?;
        self.upload(
            run,
            &format!("{}/{file_name}", artifact.artifact_path),
            bytes,
        )?;
        let example = serde_json::to_vec_pretty(&artifact.input_example)?;
        self.upload(
            run,
            &format!("{}/input_example.json", artifact.artifact_path),
            example,
        )
    }

    fn register_model(&self, run: &RunHandle, artifact_path: &str, name: &str) -> Result<()> {
        let created = self.call(
            Method::POST,
            "mlflow/registered-models/create",
            Some(&json!({ "name": name })),
        )?;
        if !created.status.is_success() && created.error_code() != Some("RESOURCE_ALREADY_EXISTS")
        {
            bail!(
                "registering model '{name}' returned {}: {}",
                created.status,
                created.body
            );
        }
        self.expect_ok(
            Method::POST,
            "mlflow/model-versions/create",
            &json!({
                "name": name,
                "source": format!("runs:/{}/{artifact_path}", run.run_id),
                "run_id": run.run_id,
            }),
        )
        .map(drop)
    }

    fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<()> {
        self.expect_ok(
            Method::POST,
            "mlflow/runs/update",
            &json!({
                "run_id": run.run_id,
                "status": status.as_str(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )
        .map(drop)
    }
}
