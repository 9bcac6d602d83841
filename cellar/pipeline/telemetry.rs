use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for the pipeline telemetry handle.
///
/// Built once by the process entry point; components receive clones scoped to their own
/// module name through [`PipelineTelemetry::scoped`].
#[derive(Debug)]
pub struct PipelineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    console: bool,
    min_level: LogLevel,
}

impl PipelineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            console: false,
            min_level: LogLevel::Debug,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Mirrors records to stdout.
    #[must_use]
    pub fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    /// Drops records below `level`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<PipelineTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(Arc::new(
                JsonLogger::new(path)?
                    .with_console(self.console)
                    .with_min_level(self.min_level),
            )),
            None => None,
        };
        Ok(PipelineTelemetry {
            module: self.module,
            logger,
        })
    }
}

/// Telemetry handle shared across pipeline components.
#[derive(Clone)]
pub struct PipelineTelemetry {
    module: String,
    logger: Option<Arc<JsonLogger>>,
}

impl fmt::Debug for PipelineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTelemetry")
            .field("module", &self.module)
            .field("log_path", &self.logger.as_ref().map(|logger| logger.path()))
            .finish()
    }
}

impl PipelineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> PipelineTelemetryBuilder {
        PipelineTelemetryBuilder::new(module)
    }

    /// Handle that records nothing.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            logger: None,
        }
    }

    /// Same sink, different module label.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            logger: self.logger.clone(),
        }
    }

    /// Module label attached to records.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.logger {
            let record = LogRecord::new(&self.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Debug-level record; sink failures go to stderr.
    pub fn debug(&self, message: &str, metadata: Value) {
        self.emit(LogLevel::Debug, message, metadata);
    }

    /// Info-level record; sink failures go to stderr.
    pub fn info(&self, message: &str, metadata: Value) {
        self.emit(LogLevel::Info, message, metadata);
    }

    /// Warn-level record; sink failures go to stderr.
    pub fn warn(&self, message: &str, metadata: Value) {
        self.emit(LogLevel::Warn, message, metadata);
    }

    /// Error-level record; sink failures go to stderr.
    pub fn error(&self, message: &str, metadata: Value) {
        self.emit(LogLevel::Error, message, metadata);
    }

    fn emit(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Err(err) = self.log(level, message, metadata) {
            eprintln!("telemetry log failed: {err:?}");
        }
    }
}
