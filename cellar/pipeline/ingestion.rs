use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

use reqwest::blocking::Client;
use serde_json::json;

use crate::{
    entity::DataIngestionConfig,
    error::{PipelineError, Result},
    telemetry::PipelineTelemetry,
};

/// What [`DataIngestion::acquire`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The archive was fetched.
    Downloaded {
        /// Bytes written to disk.
        bytes: u64,
    },
    /// A local copy already existed.
    Skipped,
}

/// Fetches the dataset archive and expands it.
#[derive(Debug, Clone)]
pub struct DataIngestion {
    config: DataIngestionConfig,
    telemetry: PipelineTelemetry,
}

impl DataIngestion {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: DataIngestionConfig, telemetry: &PipelineTelemetry) -> Self {
        Self {
            config,
            telemetry: telemetry.scoped("data_ingestion"),
        }
    }

    /// Downloads `source_url` into `local_data_file` unless that file already exists.
    pub fn acquire(&self) -> Result<AcquireOutcome> {
        let target = &self.config.local_data_file;
        if target.exists() {
            self.telemetry.info(
                "archive already present, skipping download",
                json!({ "path": target }),
            );
            return Ok(AcquireOutcome::Skipped);
        }
        match self.download(target) {
            Ok(bytes) => {
                self.telemetry.info(
                    "archive downloaded",
                    json!({ "url": self.config.source_url, "path": target, "bytes": bytes }),
                );
                Ok(AcquireOutcome::Downloaded { bytes })
            }
            Err(message) => {
                if target.exists() {
                    if let Err(err) = fs::remove_file(target) {
                        self.telemetry.warn(
                            "could not remove partial download",
                            json!({ "path": target, "error": err.to_string() }),
                        );
                    }
                }
                self.telemetry.error(
                    "download failed",
                    json!({ "url": self.config.source_url, "error": message }),
                );
                Err(PipelineError::Acquisition {
                    url: self.config.source_url.clone(),
                    path: target.clone(),
                    message,
                })
            }
        }
    }

    fn download(&self, target: &Path) -> std::result::Result<u64, String> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| err.to_string())?;
        }
        let client = Client::builder()
            .user_agent("cellar-ingestion/0.1")
            .build()
            .map_err(|err| err.to_string())?;
        let mut response = client
            .get(&self.config.source_url)
            .send()
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("server returned {status}"));
        }
        let mut file = File::create(target).map_err(|err| err.to_string())?;
        let bytes = response.copy_to(&mut file).map_err(|err| err.to_string())?;
        file.flush().map_err(|err| err.to_string())?;
        Ok(bytes)
    }

    /// Extracts every entry of the archive into `unzip_dir`. Files already extracted
    /// before a failure are left in place.
    pub fn expand(&self) -> Result<()> {
        let archive_path = &self.config.local_data_file;
        let destination = &self.config.unzip_dir;
        let expansion_err = |message: String| PipelineError::Expansion {
            archive: archive_path.clone(),
            destination: destination.clone(),
            message,
        };
        let result = fs::create_dir_all(destination)
            .map_err(|err| expansion_err(err.to_string()))
            .and_then(|()| File::open(archive_path).map_err(|err| expansion_err(err.to_string())))
            .and_then(|file| {
                zip::ZipArchive::new(io::BufReader::new(file))
                    .map_err(|err| expansion_err(err.to_string()))
            })
            .and_then(|mut archive| {
                let entries = archive.len();
                archive
                    .extract(destination)
                    .map(|()| entries)
                    .map_err(|err| expansion_err(err.to_string()))
            });
        match result {
            Ok(entries) => {
                self.telemetry.info(
                    "archive extracted",
                    json!({ "archive": archive_path, "destination": destination, "entries": entries }),
                );
                Ok(())
            }
            Err(err) => {
                self.telemetry
                    .error("archive extraction failed", json!({ "error": err.to_string() }));
                Err(err)
            }
        }
    }

    /// Acquire, then expand.
    pub fn run(&self) -> Result<AcquireOutcome> {
        let outcome = self.acquire()?;
        self.expand()?;
        Ok(outcome)
    }
}
