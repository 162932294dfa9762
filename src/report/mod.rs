use chrono::NaiveDateTime;
use std::fs;
use std::path::Path;

use crate::classify::{classify, HealthStatus, Thresholds};
use crate::error::ClassificationFailure;
use crate::record::BackupRecord;

/// Report columns, in sheet order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Customer,
    Type,
    Placement,
    Size,
    Duration,
    BackupName,
    BackupCount,
    ExpectedCount,
    LastBackupDate,
    Description,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::Customer,
        Column::Type,
        Column::Placement,
        Column::Size,
        Column::Duration,
        Column::BackupName,
        Column::BackupCount,
        Column::ExpectedCount,
        Column::LastBackupDate,
        Column::Description,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Column::Customer => "Customer",
            Column::Type => "Type",
            Column::Placement => "Placement",
            Column::Size => "Size",
            Column::Duration => "Duration",
            Column::BackupName => "Backup Name",
            Column::BackupCount => "Backup Count",
            Column::ExpectedCount => "Expected Count",
            Column::LastBackupDate => "Last Backup Date",
            Column::Description => "Description",
        }
    }

    /// Display text of this column for one record.
    pub fn value(self, record: &BackupRecord) -> String {
        match self {
            Column::Customer => record.customer.to_string(),
            Column::Type => record.backend_type.to_string(),
            Column::Placement => record.placement.to_string(),
            Column::Size => record.size_mb.to_string(),
            Column::Duration => record.duration.to_string(),
            Column::BackupName => record.backup_name.to_string(),
            Column::BackupCount => record.observed_backup_count.to_string(),
            Column::ExpectedCount => record.expected_backup_count.to_string(),
            Column::LastBackupDate => record.last_backup_at.to_string(),
            Column::Description => record.description.to_string(),
        }
    }
}

/// The report as two parallel grids: plain values and their colors.
///
/// Row 0 is the header. Keeping colors out of the values lets the value
/// grid be exported as plain delimited text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportGrid {
    values: Vec<Vec<String>>,
    colors: Vec<Vec<HealthStatus>>,
}

impl ReportGrid {
    /// Classify every record and lay the results out in input order.
    pub fn build(
        records: &[BackupRecord],
        now: NaiveDateTime,
        thresholds: &Thresholds,
    ) -> Result<Self, ClassificationFailure> {
        let mut values = Vec::with_capacity(records.len() + 1);
        let mut colors = Vec::with_capacity(records.len() + 1);

        values.push(Column::ALL.iter().map(|c| c.header().to_string()).collect());
        colors.push(vec![HealthStatus::Neutral; Column::ALL.len()]);

        for (i, record) in records.iter().enumerate() {
            let health = classify(record, now, thresholds).map_err(|e| e.at_row(i + 1))?;

            values.push(Column::ALL.iter().map(|c| c.value(record)).collect());
            colors.push(
                Column::ALL
                    .iter()
                    .map(|c| match c {
                        Column::BackupCount => health.backup_count,
                        Column::ExpectedCount => health.expected_count,
                        Column::LastBackupDate => health.last_backup_date,
                        _ => HealthStatus::Neutral,
                    })
                    .collect(),
            );
        }

        Ok(Self { values, colors })
    }

    /// Header row followed by one row per record.
    pub fn values(&self) -> &[Vec<String>] {
        &self.values
    }

    /// Same shape as [`ReportGrid::values`].
    pub fn colors(&self) -> &[Vec<HealthStatus>] {
        &self.colors
    }

    /// `(value, status)` at a 0-based position, header included.
    pub fn cell(&self, row: usize, column: usize) -> Option<(&str, HealthStatus)> {
        let value = self.values.get(row)?.get(column)?;
        let status = self.colors.get(row)?.get(column)?;
        Some((value.as_str(), *status))
    }

    /// Number of rows, header included.
    pub fn height(&self) -> usize {
        self.values.len()
    }

    pub fn width(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    /// Comma-delimited text, quoted where needed.
    pub fn to_delimited(&self) -> String {
        let mut out = String::new();
        for row in &self.values {
            let line: Vec<String> = row.iter().map(|v| quote_field(v)).collect();
            out.push_str(&line.join(","));
            out.push_str("\r\n");
        }
        out
    }

    /// Write the staging file for the upload.
    pub fn write_staging(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.to_delimited())
    }
}

fn quote_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BackendType, BackupCount, Reported};
    use chrono::{NaiveDate, TimeDelta};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn record(customer: &str, count: u64, age_days: i64) -> BackupRecord {
        BackupRecord {
            backend_type: BackendType::FilesBucket.into(),
            customer: customer.to_string().into(),
            observed_backup_count: BackupCount::plain(count).into(),
            expected_backup_count: 5.into(),
            last_backup_at: (now() - TimeDelta::days(age_days)).into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_header_and_order() {
        let grid = ReportGrid::build(
            &[record("acme", 5, 1), record("globex", 5, 1)],
            now(),
            &Thresholds::default(),
        )
        .unwrap();

        assert_eq!(grid.height(), 3);
        assert_eq!(grid.width(), 10);
        assert_eq!(grid.values()[0][0], "Customer");
        assert_eq!(grid.values()[0][9], "Description");
        assert_eq!(grid.values()[1][0], "acme");
        assert_eq!(grid.values()[2][0], "globex");
        assert!(grid.colors()[0].iter().all(|c| *c == HealthStatus::Neutral));
    }

    #[test]
    fn test_only_monitored_columns_are_colored() {
        let grid = ReportGrid::build(&[record("acme", 1, 30)], now(), &Thresholds::default())
            .unwrap();
        let colors = &grid.colors()[1];

        assert_eq!(colors[6], HealthStatus::Alarm); // count 1 < 3
        assert_eq!(colors[7], HealthStatus::Alarm); // 1 - 5 = -4
        assert_eq!(colors[8], HealthStatus::Alarm); // 30 days old
        for (i, c) in colors.iter().enumerate() {
            if !(6..=8).contains(&i) {
                assert_eq!(*c, HealthStatus::Neutral, "column {i}");
            }
        }
        assert_eq!(grid.cell(1, 6), Some(("1", HealthStatus::Alarm)));
        assert_eq!(grid.cell(1, 10), None);
    }

    #[test]
    fn test_classification_failure_carries_row() {
        let mut bad = record("globex", 5, 1);
        bad.last_backup_at = Reported::Unparsed("whenever".to_string());

        let err = ReportGrid::build(&[record("acme", 5, 1), bad], now(), &Thresholds::default())
            .unwrap_err();
        assert_eq!(err.row, Some(2));
    }

    #[test]
    fn test_delimited_quoting() {
        let mut r = record("acme, inc", 5, 1);
        r.description = "says \"hi\"".to_string().into();
        let grid = ReportGrid::build(&[r], now(), &Thresholds::default()).unwrap();
        let text = grid.to_delimited();
        let lines: Vec<&str> = text.split("\r\n").collect();

        assert!(lines[0].starts_with("Customer,Type,Placement,Size,Duration"));
        assert!(lines[1].starts_with("\"acme, inc\",FilesBucket,None"));
        assert!(lines[1].ends_with(",\"says \"\"hi\"\"\""));
    }
}
