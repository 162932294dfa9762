use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Literal written by older reporters for values they could not determine.
pub const UNKNOWN: &str = "None";

/// A record field: known, explicitly unknown, or present but not coercible.
#[derive(Debug, Clone, PartialEq)]
pub enum Reported<T> {
    Value(T),
    Unknown,
    /// Raw text of a value that failed type coercion.
    Unparsed(String),
}

impl<T> Default for Reported<T> {
    fn default() -> Self {
        Reported::Unknown
    }
}

impl<T> Reported<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Reported::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Reported::Unknown)
    }
}

impl<T> From<T> for Reported<T> {
    fn from(value: T) -> Self {
        Reported::Value(value)
    }
}

/// Conversion between a typed field value and its JSON/display forms.
pub trait FieldValue: Sized {
    /// Coerce a raw JSON value; `None` means the value is not usable.
    fn coerce(raw: &Value) -> Option<Self>;
    fn to_json(&self) -> Value;
    fn display(&self) -> String;
}

impl<T: FieldValue> Reported<T> {
    /// Build a field from an optional raw value, as found in a metadata map.
    pub fn from_json(raw: Option<&Value>) -> Self {
        match raw {
            None | Some(Value::Null) => Reported::Unknown,
            Some(Value::String(s)) if s == UNKNOWN => Reported::Unknown,
            Some(v) => match T::coerce(v) {
                Some(value) => Reported::Value(value),
                None => Reported::Unparsed(raw_text(v)),
            },
        }
    }

    /// Build a field from operator-supplied text (config values).
    pub fn from_text(raw: Option<&str>) -> Self {
        Self::from_json(raw.map(|s| Value::String(s.to_string())).as_ref())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Reported::Value(v) => v.to_json(),
            Reported::Unknown => Value::Null,
            Reported::Unparsed(raw) => Value::String(raw.clone()),
        }
    }
}

impl<T: FieldValue> fmt::Display for Reported<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reported::Value(v) => f.write_str(&v.display()),
            Reported::Unknown => f.write_str(UNKNOWN),
            Reported::Unparsed(raw) => f.write_str(raw),
        }
    }
}

fn raw_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl FieldValue for String {
    fn coerce(raw: &Value) -> Option<Self> {
        Some(raw_text(raw))
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn display(&self) -> String {
        self.clone()
    }
}

/// Which extractor produced a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendType {
    DockerPostgres,
    FilesBucket,
    /// Tag written by some other tool; kept verbatim.
    Other(String),
}

impl BackendType {
    pub fn tag(&self) -> &str {
        match self {
            BackendType::DockerPostgres => "DockerPostgres",
            BackendType::FilesBucket => "FilesBucket",
            BackendType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FieldValue for BackendType {
    fn coerce(raw: &Value) -> Option<Self> {
        Some(match raw_text(raw).as_str() {
            "DockerPostgres" => BackendType::DockerPostgres,
            "FilesBucket" => BackendType::FilesBucket,
            other => BackendType::Other(other.to_string()),
        })
    }

    fn to_json(&self) -> Value {
        Value::String(self.tag().to_string())
    }

    fn display(&self) -> String {
        self.tag().to_string()
    }
}

impl FieldValue for Decimal {
    fn coerce(raw: &Value) -> Option<Self> {
        let text = match raw {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => return None,
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
    }

    fn to_json(&self) -> Value {
        Value::String(self.to_string())
    }

    fn display(&self) -> String {
        self.round_dp(2).to_string()
    }
}

impl FieldValue for u64 {
    fn coerce(raw: &Value) -> Option<Self> {
        match raw {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::from(*self)
    }

    fn display(&self) -> String {
        self.to_string()
    }
}

/// Full/incremental split of an observed backup count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountSplit {
    pub full: u64,
    pub incremental: u64,
}

/// Number of backups observed at a placement.
///
/// Displayed either as a bare integer or as `"N total / F full / I incremental"`.
/// Monitors only look at `total`, which is also the leading integer of the
/// composite form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupCount {
    pub total: u64,
    pub split: Option<CountSplit>,
}

impl BackupCount {
    pub fn plain(total: u64) -> Self {
        Self { total, split: None }
    }

    pub fn split(full: u64, incremental: u64) -> Self {
        Self {
            total: full + incremental,
            split: Some(CountSplit { full, incremental }),
        }
    }

    /// Parse a bare integer or the composite form. Anything else with a
    /// leading integer is accepted through that integer alone, unless a
    /// fraction follows it.
    pub fn parse(raw: &str) -> Option<Self> {
        static COMPOSITE: OnceLock<Regex> = OnceLock::new();
        let raw = raw.trim();

        if let Ok(total) = raw.parse::<u64>() {
            return Some(Self::plain(total));
        }

        let composite = COMPOSITE.get_or_init(|| {
            Regex::new(r"^(\d+) total / (\d+) full / (\d+) incremental$")
                .expect("valid composite count regex")
        });
        if let Some(caps) = composite.captures(raw) {
            let total = caps[1].parse().ok()?;
            let full = caps[2].parse().ok()?;
            let incremental = caps[3].parse().ok()?;
            return Some(Self {
                total,
                split: Some(CountSplit { full, incremental }),
            });
        }

        // Legacy fallback: the leading integer of whatever was written.
        let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
        if raw[digits.len()..].starts_with('.') {
            return None;
        }
        digits.parse().ok().map(Self::plain)
    }
}

impl fmt::Display for BackupCount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.split {
            Some(split) => write!(
                f,
                "{} total / {} full / {} incremental",
                self.total, split.full, split.incremental
            ),
            None => write!(f, "{}", self.total),
        }
    }
}

impl FieldValue for BackupCount {
    fn coerce(raw: &Value) -> Option<Self> {
        match raw {
            Value::Number(_) => u64::coerce(raw).map(Self::plain),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self.split {
            Some(_) => Value::String(self.to_string()),
            None => Value::from(self.total),
        }
    }

    fn display(&self) -> String {
        self.to_string()
    }
}

impl FieldValue for TimeDelta {
    fn coerce(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(s) => parse_duration_text(s),
            Value::Number(n) => {
                let secs = n.as_f64()?;
                TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)
            }
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::String(format_duration(self))
    }

    fn display(&self) -> String {
        format_duration(self)
    }
}

/// Render a duration as `H:MM:SS`, with a `N day(s), ` prefix and a
/// fractional part when needed.
pub fn format_duration(d: &TimeDelta) -> String {
    let sign = if *d < TimeDelta::zero() { "-" } else { "" };
    let abs = d.abs();
    let days = abs.num_days();
    let secs = abs.num_seconds() - days * 86_400;
    let nanos = abs.subsec_nanos();

    let mut out = String::from(sign);
    match days {
        0 => {}
        1 => out.push_str("1 day, "),
        n => out.push_str(&format!("{n} days, ")),
    }
    out.push_str(&format!(
        "{}:{:02}:{:02}",
        secs / 3600,
        secs % 3600 / 60,
        secs % 60
    ));
    if nanos != 0 {
        if nanos % 1000 == 0 {
            out.push_str(&format!(".{:06}", nanos / 1000));
        } else {
            out.push_str(&format!(".{:09}", nanos));
        }
    }
    out
}

/// Inverse of [`format_duration`].
pub fn parse_duration_text(raw: &str) -> Option<TimeDelta> {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    let re = DURATION.get_or_init(|| {
        Regex::new(r"^(-)?(?:(\d+) days?, )?(\d+):(\d{2}):(\d{2})(?:\.(\d{1,9}))?$")
            .expect("valid duration regex")
    });
    let caps = re.captures(raw.trim())?;

    let days: i64 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let hours: i64 = caps[3].parse().ok()?;
    let minutes: i64 = caps[4].parse().ok()?;
    let seconds: i64 = caps[5].parse().ok()?;
    let nanos: i64 = match caps.get(6) {
        Some(frac) => format!("{:0<9}", frac.as_str()).parse().ok()?,
        None => 0,
    };

    let total = TimeDelta::try_days(days)?
        .checked_add(&TimeDelta::try_hours(hours)?)?
        .checked_add(&TimeDelta::try_minutes(minutes)?)?
        .checked_add(&TimeDelta::try_seconds(seconds)?)?
        .checked_add(&TimeDelta::nanoseconds(nanos))?;

    Some(if caps.get(1).is_some() { -total } else { total })
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d_%m_%Y-%H_%M_%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Parse a timestamp in any of the formats backends and operators write.
/// Zoned values are converted to the host's local time, the same clock
/// staleness is measured against. Naive values are taken as local already.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    let local = |dt: DateTime<FixedOffset>| dt.with_timezone(&Local).naive_local();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(local(dt));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(local(dt));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl FieldValue for NaiveDateTime {
    fn coerce(raw: &Value) -> Option<Self> {
        match raw {
            Value::String(s) => parse_timestamp(s),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        Value::String(self.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    }

    fn display(&self) -> String {
        self.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
