//! Database Backup Tool
//!
//! Dumps PostgreSQL or MySQL databases with their native dump utilities and
//! archives the dumps to object storage.

// dbbackup/src/main.rs
mod backup;
mod config;
mod errors;

use anyhow::{Context, Result};
use backup::db_dump::CommandDumper;
use backup::logic::RunTimestamp;
use backup::s3_upload::S3Uploader;
use backup::{BackupOrchestrator, RunSummary};
use clap::Parser;
use config::{AppConfig, Cli};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; flags and the real environment still apply.
    dotenv::dotenv().ok();
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run_app(cli).await {
        Ok(summary) => ExitCode::from(summary.exit_status()),
        Err(e) => {
            error!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_app(cli: Cli) -> Result<RunSummary> {
    let app_config = AppConfig::from_cli(cli).context("Failed to load configuration")?;

    let uploader = S3Uploader::from_config(&app_config.storage).await;
    let dumper = CommandDumper::new(app_config.dump_tools.clone());

    let orchestrator = BackupOrchestrator::new(
        app_config.backup.target.clone(),
        app_config.storage.bucket_name.clone(),
        app_config.backup.temp_dir.clone(),
        RunTimestamp::now(),
        Box::new(dumper),
        Box::new(uploader),
    );
    info!(
        engine = %app_config.backup.target.engine,
        host = %app_config.backup.target.host,
        bucket = %app_config.storage.bucket_name,
        run = %orchestrator.run_timestamp().stamp,
        "Starting backup run"
    );

    Ok(backup::run_backup_flow(&orchestrator, &app_config.backup.databases).await)
}
