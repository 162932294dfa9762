use chrono::{Local, TimeDelta};
use regex::Regex;
use rust_decimal::Decimal;

use crate::record::{BackendType, BackupCount, BackupRecord, Reported};
use crate::storage::ObjectSummary;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Shell-style file name mask: `*`, `?`, `[abc]`, `[!abc]`.
#[derive(Debug, Clone)]
pub struct FileMask {
    pattern: String,
    regex: Regex,
}

impl FileMask {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&glob_to_regex(pattern))?,
        })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl Default for FileMask {
    fn default() -> Self {
        Self {
            pattern: "*".to_string(),
            regex: Regex::new("^.*$").expect("valid match-all regex"),
        }
    }
}

/// Escape a character inside a `[...]` class.
fn escape_class_char(out: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
        out.push('\\');
    }
    out.push(c);
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; a `]` right after `[` or `[!` is literal.
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str("\\[");
                    continue;
                }

                let mut class = &chars[i..j];
                out.push('[');
                if class.first() == Some(&'!') {
                    out.push('^');
                    class = &class[1..];
                }
                for &cc in class {
                    if cc == '-' {
                        out.push('-');
                    } else {
                        escape_class_char(&mut out, cc);
                    }
                }
                out.push(']');
                i = j + 1;
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }

    out.push('$');
    out
}

/// Build a record from a bucket listing: the newest object matching the mask
/// is the current backup, every match counts.
pub fn summarize(objects: &[ObjectSummary], mask: &FileMask, placement: &str) -> BackupRecord {
    let matching: Vec<&ObjectSummary> = objects
        .iter()
        .filter(|o| mask.matches(o.file_name()))
        .collect();
    let latest = matching.iter().max_by_key(|o| o.last_modified);

    let mut record = BackupRecord {
        placement: Reported::Value(placement.to_string()),
        observed_backup_count: Reported::Value(BackupCount::plain(matching.len() as u64)),
        duration: Reported::Value(TimeDelta::zero()),
        ..BackupRecord::for_backend(BackendType::FilesBucket)
    };

    if let Some(latest) = latest {
        record.backup_name = Reported::Value(latest.file_name().to_string());
        record.size_mb = Reported::Value(
            (Decimal::from(latest.size_bytes) / Decimal::from(BYTES_PER_MB)).round_dp(2),
        );
        record.last_backup_at =
            Reported::Value(latest.last_modified.with_timezone(&Local).naive_local());
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn obj(key: &str, day: u32, size: u64) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            last_modified: Utc.with_ymd_and_hms(2024, 6, day, 1, 0, 0).unwrap(),
            size_bytes: size,
        }
    }

    #[test]
    fn test_mask_semantics() {
        let gz = FileMask::new("*.tar.gz").unwrap();
        assert!(gz.matches("site-2024.tar.gz"));
        assert!(!gz.matches("site-2024.tar.gz.part"));
        assert!(!gz.matches("site-2024.targz"));

        let two = FileMask::new("db-??.sql").unwrap();
        assert!(two.matches("db-01.sql"));
        assert!(!two.matches("db-1.sql"));

        let not_x = FileMask::new("[!x]*").unwrap();
        assert!(not_x.matches("dump.sql"));
        assert!(!not_x.matches("xdump.sql"));

        let range = FileMask::new("v[0-9].bin").unwrap();
        assert!(range.matches("v7.bin"));
        assert!(!range.matches("va.bin"));

        let unclosed = FileMask::new("a[b").unwrap();
        assert!(unclosed.matches("a[b"));

        assert!(FileMask::default().matches("anything at all"));
    }

    #[test]
    fn test_summarize_picks_latest_match() {
        let objects = vec![
            obj("dumps/db-01.sql.gz", 10, 3 * BYTES_PER_MB),
            obj("dumps/db-02.sql.gz", 12, 4 * BYTES_PER_MB),
            obj("dumps/notes.txt", 14, 10),
            obj("dumps/db-00.sql.gz", 8, 2 * BYTES_PER_MB),
        ];
        let mask = FileMask::new("*.sql.gz").unwrap();

        let record = summarize(&objects, &mask, "s3://acme/dumps");

        assert_eq!(record.backend_type.value(), Some(&BackendType::FilesBucket));
        assert_eq!(record.backup_name.value().map(String::as_str), Some("db-02.sql.gz"));
        assert_eq!(record.observed_backup_count.value(), Some(&BackupCount::plain(3)));
        assert_eq!(record.size_mb.value(), Some(&Decimal::from(4)));
        assert_eq!(record.duration.value(), Some(&TimeDelta::zero()));
        assert_eq!(
            record.last_backup_at.value(),
            Some(&objects[1].last_modified.with_timezone(&Local).naive_local())
        );
    }

    #[test]
    fn test_summarize_without_matches() {
        let record = summarize(&[obj("a.txt", 1, 1)], &FileMask::new("*.gz").unwrap(), "s3://x");
        assert_eq!(record.observed_backup_count.value(), Some(&BackupCount::plain(0)));
        assert!(record.backup_name.is_unknown());
        assert!(record.last_backup_at.is_unknown());
    }
}
