//! ltstat - Lithuania statistics ETL pipeline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ltstat_common::logging::{init_logging, LogConfig, LogLevel};
use ltstat_pipeline::staging::S3ObjectStore;
use ltstat_pipeline::warehouse::{MemoryWarehouse, PostgresWarehouse, Warehouse};
use ltstat_pipeline::{PipelineConfig, PipelineDriver};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ltstat")]
#[command(author, version, about = "Lithuania statistics ETL pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Staging bucket (overrides LTSTAT_BUCKET)
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Warehouse dataset (overrides LTSTAT_DATASET)
    #[arg(long, global = true)]
    dataset: Option<String>,

    /// Load into an in-process warehouse instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Fetch archive sources and stage their members
    Extract,
    /// Transform staged files and load them into the warehouse
    Load,
    /// Extract, then load
    Run,
}

impl Command {
    fn loads(self) -> bool {
        matches!(self, Command::Load | Command::Run)
    }
}

fn print_json<T: Serialize>(report: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(report).context("Failed to serialize report")?
    );
    Ok(())
}

fn build_warehouse(cli: &Cli, config: &PipelineConfig) -> Result<Arc<dyn Warehouse>> {
    if cli.dry_run {
        info!("Dry run: loading into the in-process warehouse");
        return Ok(Arc::new(MemoryWarehouse::new()));
    }

    match &config.database.url {
        Some(url) => Ok(Arc::new(
            PostgresWarehouse::connect_lazy(url, config.database.max_connections)
                .context("Invalid DATABASE_URL")?,
        )),
        None if cli.command.loads() => {
            anyhow::bail!("DATABASE_URL must be set to load (or pass --dry-run)")
        },
        None => Ok(Arc::new(MemoryWarehouse::new())),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ltstat")
        .filter_directives("aws_config=warn,aws_smithy_runtime=warn,sqlx=warn,hyper=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = PipelineConfig::load()?;
    if let Some(bucket) = &cli.bucket {
        config.bucket_name = bucket.clone();
    }
    if let Some(dataset) = &cli.dataset {
        config.dataset = dataset.clone();
    }
    config.validate()?;

    info!(
        command = ?cli.command,
        bucket = %config.bucket_name,
        dataset = %config.dataset,
        "Starting ltstat"
    );

    let store = Arc::new(S3ObjectStore::new(&config.storage).await);
    let warehouse = build_warehouse(&cli, &config)?;
    let driver = PipelineDriver::from_config(&config, store, warehouse)?;

    let success = match cli.command {
        Command::Extract => {
            let report = driver.extract().await;
            if cli.json {
                print_json(&report.summary())?;
            }
            report.is_success()
        },
        Command::Load => {
            let report = driver.load().await;
            if cli.json {
                print_json(&report.summary())?;
            }
            report.is_success()
        },
        Command::Run => {
            let report = driver.run().await;
            if cli.json {
                print_json(&report.summary())?;
            }
            report.is_success()
        },
    };

    if success {
        info!("ltstat complete");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("ltstat finished with failures");
        Ok(ExitCode::from(1))
    }
}
