//! The two run modes: `collect` publishes the sheet from every metadata
//! document, `report` inspects one backend and uploads its document.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::future::Future;
use std::time::Duration;

use crate::classify::Thresholds;
use crate::config::{require, BucketConfig, Config, ReportSource};
use crate::error::CollectionFailure;
use crate::extract::{Backend, Connector, FileMask};
use crate::record::{BackupRecord, Reported};
use crate::report::ReportGrid;
use crate::sink::{GoogleSheets, Reconciler, ServiceAccountKey, SinkSettings, TabularSink};
use crate::storage::S3Location;

/// Backends a `collect` run reads: one metadata document per bucket entry.
pub fn collect_backends(cfg: &Config) -> Vec<Backend> {
    cfg.bucket
        .iter()
        .map(|bucket| Backend::MetadataDocument {
            bucket: bucket.clone(),
        })
        .collect()
}

/// Try every backend in order, keeping successes and failures apart.
pub async fn collect_all(
    backends: &[Backend],
    connector: &dyn Connector,
) -> (Vec<BackupRecord>, Vec<CollectionFailure>) {
    let mut records = Vec::with_capacity(backends.len());
    let mut failures = Vec::new();

    for backend in backends {
        match backend.collect(connector).await {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::error!("{}", e);
                failures.push(e);
            }
        }
    }
    (records, failures)
}

pub fn sink_settings(cfg: &Config) -> Result<SinkSettings> {
    Ok(SinkSettings {
        container_name: require(&cfg.spreadsheet_name, "spreadsheet_name")?.to_string(),
        worksheet_name: require(&cfg.worksheet_name, "worksheet_name")?.to_string(),
        owner: cfg.sheet_owner.clone().filter(|o| !o.is_empty()),
        row_delay: cfg.row_delay()?,
    })
}

/// Authenticate with the configured service-account key.
pub async fn connect_sheets(cfg: &Config) -> Result<GoogleSheets> {
    let path = cfg
        .google_spreadsheet_credentials_path
        .as_deref()
        .context("config key `google_spreadsheet_credentials_path` is required in this mode")?;
    let key = ServiceAccountKey::from_file(path)?;
    Ok(GoogleSheets::connect(&key).await?)
}

/// Gather every metadata document, build the report and publish it.
///
/// The sink is not touched unless every backend answered, or
/// `skip_failed_backends` is set.
pub async fn run_collect<S: TabularSink>(
    cfg: &Config,
    connector: &dyn Connector,
    reconciler: &Reconciler<S>,
    now: NaiveDateTime,
) -> Result<ReportGrid> {
    let backends = collect_backends(cfg);
    tracing::info!("Collecting metadata from {} backends", backends.len());

    let (records, mut failures) = collect_all(&backends, connector).await;
    if !failures.is_empty() {
        if cfg.skip_failed_backends {
            tracing::warn!(
                "Skipping {} failed backends, reporting {}",
                failures.len(),
                records.len()
            );
        } else {
            let total = failures.len();
            let first = failures.remove(0);
            return Err(anyhow::Error::new(first))
                .with_context(|| format!("{} of {} backends failed", total, backends.len()));
        }
    }

    tracing::info!("Compile report");
    let grid = ReportGrid::build(&records, now, &Thresholds::default())?;

    let staging = &cfg.staging_path;
    grid.write_staging(staging)
        .with_context(|| format!("writing staging file {}", staging.display()))?;

    tracing::info!("Upload report to spreadsheet");
    reconciler.reconcile(&grid).await?;

    fs::remove_file(staging)
        .with_context(|| format!("removing staging file {}", staging.display()))?;
    Ok(grid)
}

/// The backend a `report` run inspects.
pub fn report_backend(cfg: &Config, source: ReportSource) -> Result<Backend> {
    let bucket = cfg.report_bucket()?;
    match source {
        ReportSource::DockerPostgres => Ok(Backend::ContainerBackup {
            container: require(&cfg.container_name, "container_name")?.to_string(),
            metadata_path: bucket.s3_path.clone(),
        }),
        ReportSource::FilesBucket => {
            // Backups live next to the metadata document.
            let metadata = S3Location::parse(&bucket.s3_path)?;
            let listing = metadata.parent();
            let mask = match cfg.files_mask.as_deref() {
                Some(pattern) if !pattern.is_empty() => FileMask::new(pattern)
                    .with_context(|| format!("invalid files_mask '{}'", pattern))?,
                _ => FileMask::default(),
            };
            Ok(Backend::BucketListing {
                bucket: BucketConfig {
                    s3_path: listing.to_string(),
                    ..bucket.clone()
                },
                mask,
                ignore: Some(metadata.key),
            })
        }
    }
}

/// Inspect one backend and upload its metadata document.
pub async fn run_report(
    cfg: &Config,
    source: ReportSource,
    connector: &dyn Connector,
) -> Result<BackupRecord> {
    let backend = report_backend(cfg, source)?;
    let mut record = backend.collect(connector).await?;

    record.customer = Reported::from_text(cfg.customer.as_deref());
    record.expected_backup_count = Reported::from_text(cfg.supposed_backups_count.as_deref());
    record.description = Reported::from_text(cfg.description.as_deref());

    let bucket = cfg.report_bucket()?;
    let location = S3Location::parse(&bucket.s3_path)?;
    tracing::info!("Upload metadata to {} ...", location);

    let body = serde_json::to_vec_pretty(&record.to_document())?;
    let store = connector.store(bucket).await?;
    store.put_object(&location, body).await?;

    tracing::info!("Upload metadata success");
    Ok(record)
}

/// Local wall-clock time, as the staleness monitor expects it.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Run `fut`, failing once `deadline` passes.
pub async fn with_deadline<T>(
    deadline: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::anyhow!("run did not finish within {:?}", limit))?,
        None => fut.await,
    }
}
