use std::path::PathBuf;

use anyhow::{Context, Result};
use cellar_pipeline::{
    constants::{LOG_FILE_PATH, RUN_MANIFEST_PATH},
    ConfigPaths, ConfigurationManager, ModelPrediction, PipelineRunner, PipelineTelemetry,
    RunManifest, Stage, StageOutput,
};
use cellar_serve::{run_server, ServerConfig};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "cellar", version, about = "Wine-quality ElasticNet pipeline")]
struct Cli {
    /// JSON-lines log file shared by every stage.
    #[arg(long, global = true, default_value = LOG_FILE_PATH)]
    log_file: PathBuf,
    /// Also write debug records.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs every stage in order, stopping at the first failure.
    Run {
        #[command(flatten)]
        documents: DocumentArgs,
        #[arg(long, default_value = RUN_MANIFEST_PATH)]
        manifest: PathBuf,
    },
    /// Runs a single stage.
    Stage {
        /// ingest, validate, split, train or evaluate.
        stage: Stage,
        #[command(flatten)]
        documents: DocumentArgs,
    },
    /// Predicts one row of comma-separated feature values, in schema order.
    Predict {
        #[arg(long)]
        values: String,
        #[command(flatten)]
        documents: DocumentArgs,
    },
    /// Serves the HTML form front-end.
    Serve {
        /// Bind address; falls back to `API_HOST`, then 0.0.0.0.
        #[arg(long)]
        host: Option<String>,
        /// Bind port; falls back to `API_PORT`, then 8080.
        #[arg(long)]
        port: Option<u16>,
        #[command(flatten)]
        documents: DocumentArgs,
        #[arg(long, default_value = RUN_MANIFEST_PATH)]
        manifest: PathBuf,
    },
    /// Lists most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = RUN_MANIFEST_PATH)]
        manifest: PathBuf,
    },
    /// Shows the ledger entry for a run id.
    Status {
        run_id: String,
        #[arg(long, default_value = RUN_MANIFEST_PATH)]
        manifest: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct DocumentArgs {
    #[arg(long, default_value = cellar_pipeline::constants::CONFIG_FILE_PATH)]
    config: PathBuf,
    #[arg(long, default_value = cellar_pipeline::constants::PARAMS_FILE_PATH)]
    params: PathBuf,
    #[arg(long, default_value = cellar_pipeline::constants::SCHEMA_FILE_PATH)]
    schema: PathBuf,
}

impl From<DocumentArgs> for ConfigPaths {
    fn from(args: DocumentArgs) -> Self {
        Self {
            config: args.config,
            params: args.params,
            schema: args.schema,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = PipelineTelemetry::builder("cellar")
        .log_path(&cli.log_file)
        .console(true)
        .min_level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .build()
        .with_context(|| format!("opening log file {}", cli.log_file.display()))?;

    match cli.command {
        Commands::Run {
            documents,
            manifest,
        } => handle_run(documents.into(), manifest, &telemetry),
        Commands::Stage { stage, documents } => {
            let runner = PipelineRunner::new(documents.into(), &telemetry);
            let output = runner.run_stage(stage)?;
            println!("{}: {}", stage.title(), describe(&output));
            Ok(())
        }
        Commands::Predict { values, documents } => {
            let row = parse_values(&values)?;
            let prediction = handle_predict(&documents.into(), row, &telemetry)?;
            println!("{prediction}");
            Ok(())
        }
        Commands::Serve {
            host,
            port,
            documents,
            manifest,
        } => {
            let config = server_config(host, port, documents.into(), manifest);
            let runtime = Runtime::new().context("starting async runtime")?;
            runtime.block_on(run_server(config, &telemetry))
        }
        Commands::List { limit, manifest } => {
            let entries = RunManifest::new(manifest).read()?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {}",
                    entry.run_id,
                    entry.status,
                    entry.started_at,
                    entry.failed_stage.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Status { run_id, manifest } => {
            match RunManifest::new(manifest).find(&run_id)? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => println!("run {run_id} not found"),
            }
            Ok(())
        }
    }
}

fn server_config(
    host: Option<String>,
    port: Option<u16>,
    paths: ConfigPaths,
    manifest: PathBuf,
) -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        host: host.unwrap_or(defaults.host),
        port: port.unwrap_or(defaults.port),
        paths,
        manifest: Some(manifest),
    }
}

fn handle_run(paths: ConfigPaths, manifest: PathBuf, telemetry: &PipelineTelemetry) -> Result<()> {
    let runner = PipelineRunner::new(paths, telemetry).with_manifest(RunManifest::new(manifest));
    match runner.run() {
        Ok(report) => {
            for (stage, output) in &report.outputs {
                println!("{}: {}", stage.title(), describe(output));
            }
            if let Some(run_id) = &report.run_id {
                println!("run {run_id} completed");
            }
            Ok(())
        }
        Err(failure) => {
            telemetry.error(
                "pipeline aborted",
                json!({ "stage": failure.stage.key(), "kind": failure.source.kind() }),
            );
            Err(failure.into())
        }
    }
}

fn handle_predict(
    paths: &ConfigPaths,
    row: Vec<f64>,
    telemetry: &PipelineTelemetry,
) -> Result<f64> {
    let config = ConfigurationManager::from_paths(paths)?.with_telemetry(telemetry);
    let predictor = ModelPrediction::new(config.get_model_prediction_config()?, telemetry);
    let predictions = predictor.predict(&[row])?;
    predictions
        .first()
        .copied()
        .context("model returned no prediction")
}

fn parse_values(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(idx, value)| {
            value
                .parse::<f64>()
                .with_context(|| format!("value {} is not a number: `{value}`", idx + 1))
        })
        .collect()
}

fn describe(output: &StageOutput) -> String {
    match output {
        StageOutput::Ingested(outcome) => format!("{outcome:?}"),
        StageOutput::Validated(status) => format!("validation status {status}"),
        StageOutput::Split { train, test } => {
            format!("train {} | test {}", train.display(), test.display())
        }
        StageOutput::Trained(report) => report.summary(),
        StageOutput::Evaluated(metrics) => metrics.summary(),
    }
}
