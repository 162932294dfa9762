mod fields;

pub use fields::{
    format_duration, parse_duration_text, parse_timestamp, BackendType, BackupCount, CountSplit,
    FieldValue, Reported, UNKNOWN,
};

use chrono::{NaiveDateTime, TimeDelta};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Keys of the canonical metadata document. They match what existing
/// reporters already upload, so old documents stay readable.
pub mod keys {
    pub const TYPE: &str = "type";
    pub const CUSTOMER: &str = "customer";
    pub const PLACEMENT: &str = "placement";
    pub const BACKUP_NAME: &str = "backup_name";
    pub const SIZE: &str = "size";
    pub const TIME: &str = "time";
    pub const DESCRIPTION: &str = "description";
    pub const LAST_BACKUP_DATE: &str = "last_backup_date";
    pub const COUNT_OF_BACKUPS: &str = "count_of_backups";
    pub const SUPPOSED_BACKUPS_COUNT: &str = "supposed_backups_count";
}

/// One row of the backup report.
///
/// Every field is a [`Reported`] value, so a missing key is an explicit
/// `Unknown` rather than an absent field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackupRecord {
    pub backend_type: Reported<BackendType>,
    pub customer: Reported<String>,
    pub placement: Reported<String>,
    pub backup_name: Reported<String>,
    pub size_mb: Reported<Decimal>,
    pub duration: Reported<TimeDelta>,
    pub description: Reported<String>,
    pub last_backup_at: Reported<NaiveDateTime>,
    pub observed_backup_count: Reported<BackupCount>,
    pub expected_backup_count: Reported<u64>,
}

impl BackupRecord {
    /// Build a record from raw key/value metadata. Never fails: missing keys
    /// become `Unknown`, values that cannot be coerced are kept as raw text.
    pub fn from_raw(raw: &Map<String, Value>) -> Self {
        Self {
            backend_type: Reported::from_json(raw.get(keys::TYPE)),
            customer: Reported::from_json(raw.get(keys::CUSTOMER)),
            placement: Reported::from_json(raw.get(keys::PLACEMENT)),
            backup_name: Reported::from_json(raw.get(keys::BACKUP_NAME)),
            size_mb: Reported::from_json(raw.get(keys::SIZE)),
            duration: Reported::from_json(raw.get(keys::TIME)),
            description: Reported::from_json(raw.get(keys::DESCRIPTION)),
            last_backup_at: Reported::from_json(raw.get(keys::LAST_BACKUP_DATE)),
            observed_backup_count: Reported::from_json(raw.get(keys::COUNT_OF_BACKUPS)),
            expected_backup_count: Reported::from_json(raw.get(keys::SUPPOSED_BACKUPS_COUNT)),
        }
    }

    /// Fresh record for a backend, everything else unknown.
    pub fn for_backend(backend_type: BackendType) -> Self {
        Self {
            backend_type: Reported::Value(backend_type),
            ..Default::default()
        }
    }

    /// Canonical JSON document, the inverse of [`BackupRecord::from_raw`].
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(keys::TYPE.into(), self.backend_type.to_json());
        doc.insert(keys::CUSTOMER.into(), self.customer.to_json());
        doc.insert(keys::PLACEMENT.into(), self.placement.to_json());
        doc.insert(keys::BACKUP_NAME.into(), self.backup_name.to_json());
        doc.insert(keys::SIZE.into(), self.size_mb.to_json());
        doc.insert(keys::TIME.into(), self.duration.to_json());
        doc.insert(keys::DESCRIPTION.into(), self.description.to_json());
        doc.insert(keys::LAST_BACKUP_DATE.into(), self.last_backup_at.to_json());
        doc.insert(
            keys::COUNT_OF_BACKUPS.into(),
            self.observed_backup_count.to_json(),
        );
        doc.insert(
            keys::SUPPOSED_BACKUPS_COUNT.into(),
            self.expected_backup_count.to_json(),
        );
        Value::Object(doc)
    }
}

impl Serialize for BackupRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BackupRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Ok(BackupRecord::from_raw(&raw))
    }
}
