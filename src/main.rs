use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use backup_reporter::config::{Config, ReportSource, RunMode};
use backup_reporter::extract::LiveConnector;
use backup_reporter::pipeline;
use backup_reporter::sink::Reconciler;

#[derive(Parser)]
#[command(name = "backup-reporter")]
#[command(about = "Backup health reports for WAL-G containers and S3 buckets")]
#[command(version)]
struct Cli {
    /// Config file (YAML, TOML or JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Defaults to the mode flags in the config file
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every metadata document and publish the spreadsheet
    Collect,
    /// Inspect one backend and upload its metadata document
    Report {
        #[command(subcommand)]
        source: Source,
    },
}

#[derive(Subcommand)]
enum Source {
    /// WAL-G backups of a Postgres container
    DockerPostgres,
    /// Plain backup files in a bucket
    FilesBucket,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cfg.log_directive()))
        .context("invalid logging_level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mode = match cli.command {
        Some(Commands::Collect) => RunMode::Collect,
        Some(Commands::Report { source }) => RunMode::Report(match source {
            Source::DockerPostgres => ReportSource::DockerPostgres,
            Source::FilesBucket => ReportSource::FilesBucket,
        }),
        None => cfg.mode()?,
    };

    pipeline::with_deadline(cfg.run_timeout()?, run(&cfg, mode)).await
}

async fn run(cfg: &Config, mode: RunMode) -> Result<()> {
    let connector = LiveConnector::default();
    match mode {
        RunMode::Collect => {
            tracing::info!("Collect backups data from buckets");
            let settings = pipeline::sink_settings(cfg)?;
            let sheets = pipeline::connect_sheets(cfg).await?;
            let reconciler = Reconciler::new(sheets, settings);
            let grid =
                pipeline::run_collect(cfg, &connector, &reconciler, pipeline::local_now()).await?;
            tracing::info!("Published {} backups", grid.height().saturating_sub(1));
        }
        RunMode::Report(source) => {
            tracing::info!("Report about {:?} backups", source);
            pipeline::run_report(cfg, source, &connector).await?;
        }
    }
    Ok(())
}
