use std::path::PathBuf;

use cellar_pipeline::{ConfigPaths, PipelineTelemetry};

use crate::ServerConfig;

/// Read-only state shared by every request. Configuration and the model are reloaded
/// from disk per request, so nothing here is mutated after startup.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Declarative documents.
    pub paths: ConfigPaths,
    /// Run ledger used by `/train`.
    pub manifest: Option<PathBuf>,
    /// Telemetry for handlers.
    pub telemetry: PipelineTelemetry,
}

impl AppState {
    /// State for the given server settings.
    #[must_use]
    pub fn new(config: ServerConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            paths: config.paths,
            manifest: config.manifest,
            telemetry: telemetry.scoped("serve"),
        }
    }
}
