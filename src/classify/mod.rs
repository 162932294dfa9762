//! Health monitors for a single [`BackupRecord`].
//!
//! Each monitor is pure and looks at one record in isolation. `Unknown`
//! inputs mean "nothing reported" and stay neutral; values that were
//! reported but cannot be read are a [`ClassificationFailure`].

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::ClassificationFailure;
use crate::record::{BackupRecord, Reported};

/// Fewer backups than this is an alarm.
pub const MIN_BACKUP_COUNT: u64 = 3;
/// `observed - expected` at or below this is an alarm.
pub const SHORTFALL_ALARM: i64 = -3;
/// `observed - expected` strictly below this is a warning.
pub const SHORTFALL_WARNING: i64 = -2;
/// A last backup older than this many whole days is an alarm.
pub const MAX_BACKUP_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HealthStatus {
    #[default]
    Neutral,
    Warning,
    Alarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub min_backup_count: u64,
    pub shortfall_alarm: i64,
    pub shortfall_warning: i64,
    pub max_backup_age_days: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_backup_count: MIN_BACKUP_COUNT,
            shortfall_alarm: SHORTFALL_ALARM,
            shortfall_warning: SHORTFALL_WARNING,
            max_backup_age_days: MAX_BACKUP_AGE_DAYS,
        }
    }
}

/// Verdicts for the monitored columns of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowHealth {
    pub backup_count: HealthStatus,
    pub expected_count: HealthStatus,
    pub last_backup_date: HealthStatus,
}

/// Run every monitor against one record.
pub fn classify(
    record: &BackupRecord,
    now: NaiveDateTime,
    thresholds: &Thresholds,
) -> Result<RowHealth, ClassificationFailure> {
    Ok(RowHealth {
        backup_count: low_count(record, thresholds)?,
        expected_count: shortfall(record, thresholds)?,
        last_backup_date: staleness(record, now, thresholds)?,
    })
}

fn observed_total(record: &BackupRecord) -> Result<Option<u64>, ClassificationFailure> {
    match &record.observed_backup_count {
        Reported::Value(count) => Ok(Some(count.total)),
        Reported::Unknown => Ok(None),
        Reported::Unparsed(raw) => Err(ClassificationFailure::new(
            "backup count",
            raw.clone(),
            "not a number, even after reading its leading integer",
        )),
    }
}

/// Too few backups in absolute terms.
pub fn low_count(
    record: &BackupRecord,
    thresholds: &Thresholds,
) -> Result<HealthStatus, ClassificationFailure> {
    Ok(match observed_total(record)? {
        Some(total) if total < thresholds.min_backup_count => HealthStatus::Alarm,
        _ => HealthStatus::Neutral,
    })
}

/// Fewer backups than the operator expects.
pub fn shortfall(
    record: &BackupRecord,
    thresholds: &Thresholds,
) -> Result<HealthStatus, ClassificationFailure> {
    let observed = observed_total(record)?;
    let expected = match &record.expected_backup_count {
        Reported::Value(n) => Some(*n),
        Reported::Unknown => None,
        Reported::Unparsed(raw) => {
            return Err(ClassificationFailure::new(
                "expected count",
                raw.clone(),
                "not a number",
            ))
        }
    };

    let (Some(observed), Some(expected)) = (observed, expected) else {
        return Ok(HealthStatus::Neutral);
    };

    let d = observed as i128 - expected as i128;
    // Two separate comparisons: for whole numbers the warning band is empty.
    Ok(if d <= thresholds.shortfall_alarm as i128 {
        HealthStatus::Alarm
    } else if d < thresholds.shortfall_warning as i128 {
        HealthStatus::Warning
    } else {
        HealthStatus::Neutral
    })
}

/// Last backup too long ago. `now` is local, timezone-naive time.
pub fn staleness(
    record: &BackupRecord,
    now: NaiveDateTime,
    thresholds: &Thresholds,
) -> Result<HealthStatus, ClassificationFailure> {
    match &record.last_backup_at {
        Reported::Value(last) => {
            let elapsed_days = (now - *last).num_days();
            Ok(if elapsed_days > thresholds.max_backup_age_days {
                HealthStatus::Alarm
            } else {
                HealthStatus::Neutral
            })
        }
        Reported::Unknown => Ok(HealthStatus::Neutral),
        Reported::Unparsed(raw) => Err(ClassificationFailure::new(
            "last backup date",
            raw.clone(),
            "unrecognized date format",
        )),
    }
}
