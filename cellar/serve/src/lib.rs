#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! HTML form front-end: the input form, a `/train` trigger and a `/predict` endpoint.

/// Route table.
#[path = "../api.rs"]
pub mod api;

/// Request handlers and template rendering.
#[path = "../handlers.rs"]
pub mod handlers;

/// Shared request state.
#[path = "../state.rs"]
pub mod state;

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use cellar_pipeline::{ConfigPaths, PipelineTelemetry};
use chrono::Utc;
use serde_json::json;

pub use api::create_router;
pub use state::AppState;

/// Listener and document locations for the front-end.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Declarative documents read on every request.
    pub paths: ConfigPaths,
    /// Run ledger for `/train`, if any.
    pub manifest: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("API_PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(8080),
            paths: ConfigPaths::default(),
            manifest: None,
        }
    }
}

/// Binds the listener and serves until ctrl-c.
pub async fn run_server(config: ServerConfig, telemetry: &PipelineTelemetry) -> anyhow::Result<()> {
    let telemetry = telemetry.scoped("serve");
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))?;
    let state = Arc::new(AppState::new(config, &telemetry));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let started_at = Utc::now();
    telemetry.info(
        "server listening",
        json!({ "address": addr.to_string(), "started_at": started_at }),
    );

    let shutdown_telemetry = telemetry.clone();
    let shutdown = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            shutdown_telemetry.error(
                "ctrl-c handler unavailable",
                json!({ "error": err.to_string() }),
            );
            std::future::pending::<()>().await;
        }
        let uptime = Utc::now().signed_duration_since(started_at);
        shutdown_telemetry.info(
            "shutdown signal received",
            json!({ "uptime_secs": uptime.num_seconds() }),
        );
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving http")?;
    telemetry.info("server stopped", json!({}));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_reads_documents_from_cwd() {
        let config = ServerConfig::default();
        assert_eq!(config.paths, ConfigPaths::default());
        assert!(config.manifest.is_none());
    }
}
