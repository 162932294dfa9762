use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::CollectionCause;
use crate::record::{parse_timestamp, BackendType, BackupCount, BackupRecord, Reported};

/// Command that lists backups with their details, run inside the container.
pub const BACKUP_LIST_COMMAND: &[&str] = &["wal-g", "backup-list", "--detailed", "--json"];

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One entry of `wal-g backup-list --detailed --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct WalgBackup {
    pub backup_name: String,
    pub time: String,
    pub wal_file_name: String,
    pub start_time: Option<String>,
    pub finish_time: Option<String>,
    /// strftime-style format of `start_time`/`finish_time`.
    pub date_fmt: Option<String>,
    pub compressed_size: Option<u64>,
}

impl WalgBackup {
    /// Full backups are named after the WAL segment they start from; deltas
    /// carry an extra suffix.
    pub fn is_full(&self) -> bool {
        self.backup_name.ends_with(&self.wal_file_name)
    }

    fn taken_at(&self) -> Result<NaiveDateTime, CollectionCause> {
        parse_timestamp(&self.time).ok_or_else(|| {
            CollectionCause::Malformed(format!(
                "backup {} has unreadable time {:?}",
                self.backup_name, self.time
            ))
        })
    }

    fn size_mb(&self) -> Reported<Decimal> {
        match self.compressed_size {
            Some(bytes) => {
                Reported::Value((Decimal::from(bytes) / Decimal::from(BYTES_PER_MB)).round_dp(2))
            }
            None => Reported::Unknown,
        }
    }

    fn duration(&self) -> Result<Reported<TimeDelta>, CollectionCause> {
        let (Some(start), Some(finish)) = (&self.start_time, &self.finish_time) else {
            return Ok(Reported::Unknown);
        };
        let fmt = self.date_fmt.as_deref().map(strftime_to_chrono);
        let parse = |raw: &str| {
            fmt.as_deref()
                .and_then(|f| NaiveDateTime::parse_from_str(raw, f).ok())
                .or_else(|| parse_timestamp(raw))
                .ok_or_else(|| {
                    CollectionCause::Malformed(format!(
                        "backup {} has unreadable timestamp {:?}",
                        self.backup_name, raw
                    ))
                })
        };
        Ok(Reported::Value(parse(finish)? - parse(start)?))
    }
}

/// Translate the `%f` directive of a strftime format to chrono's syntax.
fn strftime_to_chrono(fmt: &str) -> String {
    fmt.replace(".%f", "%.f").replace("%f", "%6f")
}

/// Turn `backup-list` JSON into a record.
///
/// The newest backup gives the name and date. Size and duration come from
/// the newest full backup when there is one, since that is what a restore
/// needs.
pub fn summarize(output: &str, placement: &str) -> Result<BackupRecord, CollectionCause> {
    let backups: Vec<WalgBackup> = serde_json::from_str(output)
        .map_err(|e| CollectionCause::Malformed(format!("backup list is not valid JSON: {e}")))?;

    let mut latest: Option<(NaiveDateTime, &WalgBackup)> = None;
    let mut latest_full: Option<(NaiveDateTime, &WalgBackup)> = None;
    let (mut full, mut incremental) = (0u64, 0u64);

    for backup in &backups {
        let at = backup.taken_at()?;
        if latest.map_or(true, |(t, _)| at >= t) {
            latest = Some((at, backup));
        }
        if backup.is_full() {
            full += 1;
            if latest_full.map_or(true, |(t, _)| at >= t) {
                latest_full = Some((at, backup));
            }
        } else {
            incremental += 1;
        }
    }

    let Some((last_at, last)) = latest else {
        return Err(CollectionCause::Malformed("backup list is empty".to_string()));
    };
    let sized = latest_full.map_or(last, |(_, b)| b);

    Ok(BackupRecord {
        placement: Reported::Value(placement.to_string()),
        backup_name: Reported::Value(last.backup_name.clone()),
        last_backup_at: Reported::Value(last_at),
        size_mb: sized.size_mb(),
        duration: sized.duration()?,
        observed_backup_count: Reported::Value(BackupCount::split(full, incremental)),
        ..BackupRecord::for_backend(BackendType::DockerPostgres)
    })
}
