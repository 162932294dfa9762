use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration, one file per deployment.
///
/// Key names follow the config files already deployed next to the
/// reporters, hence the snake_case legacy names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging_level: String,

    /// Mode flags, used when no subcommand is given on the command line.
    pub collector: bool,
    pub docker_postgres: bool,
    pub files_bucket: bool,

    /// Metadata locations (collect) or the single backup location (report).
    pub bucket: Vec<BucketConfig>,

    pub container_name: Option<String>,
    pub customer: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub supposed_backups_count: Option<String>,
    pub description: Option<String>,
    pub files_mask: Option<String>,

    pub google_spreadsheet_credentials_path: Option<PathBuf>,
    pub spreadsheet_name: Option<String>,
    pub worksheet_name: Option<String>,
    pub sheet_owner: Option<String>,

    /// Pause after coloring each sheet row (sink write quota).
    pub row_delay: String,
    /// Deadline for a whole run, e.g. "15m".
    pub run_timeout: Option<String>,
    /// Where the delimited report is staged before upload.
    pub staging_path: PathBuf,
    /// Report whatever could be collected instead of failing the run.
    pub skip_failed_backends: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketConfig {
    pub s3_path: String,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: Option<String>,
    pub aws_endpoint_url: Option<String>,
}

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Gather metadata documents from every bucket and publish the sheet.
    Collect,
    /// Inspect one backend and upload its metadata document.
    Report(ReportSource),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    DockerPostgres,
    FilesBucket,
}

impl Config {
    /// Standard config file locations (checked in order)
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("backup-reporter.yaml"),
            PathBuf::from("/etc/backup-reporter/config.yaml"),
        ];
        if let Some(home) = dirs::home_dir() {
            paths.insert(1, home.join(".config/backup-reporter/config.yaml"));
        }
        paths
    }

    /// Load config from an explicit path, or from the first standard
    /// location that exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for path in Self::config_paths() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        tracing::debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Parse a config file; the format follows the extension
    /// (`.toml`, `.json`, anything else is YAML).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: Config = match ext {
            "toml" => toml::from_str(&content).map_err(anyhow::Error::from),
            "json" => serde_json::from_str(&content).map_err(anyhow::Error::from),
            _ => serde_yaml::from_str(&content).map_err(anyhow::Error::from),
        }
        .with_context(|| format!("parsing config from {}", path.display()))?;
        Ok(config)
    }

    /// Mode selected by the config flags.
    pub fn mode(&self) -> Result<RunMode> {
        if self.collector {
            Ok(RunMode::Collect)
        } else if self.docker_postgres {
            Ok(RunMode::Report(ReportSource::DockerPostgres))
        } else if self.files_bucket {
            Ok(RunMode::Report(ReportSource::FilesBucket))
        } else {
            anyhow::bail!("You MUST choose either reporter mode or collector mode")
        }
    }

    /// Tracing filter directive for `logging_level`; accepts Python-style
    /// names such as `WARNING` or `CRITICAL`.
    pub fn log_directive(&self) -> String {
        match self.logging_level.to_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn row_delay(&self) -> Result<Duration> {
        parse_duration(&self.row_delay)
    }

    pub fn run_timeout(&self) -> Result<Option<Duration>> {
        self.run_timeout.as_deref().map(parse_duration).transpose()
    }

    /// The single bucket a reporter works on.
    pub fn report_bucket(&self) -> Result<&BucketConfig> {
        self.bucket
            .first()
            .ok_or_else(|| anyhow::anyhow!("config has no `bucket` entry"))
    }
}

/// Fetch a required string setting.
pub fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("config key `{}` is required in this mode", key))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging_level: "info".to_string(),
            collector: false,
            docker_postgres: false,
            files_bucket: false,
            bucket: vec![],
            container_name: None,
            customer: None,
            supposed_backups_count: None,
            description: None,
            files_mask: None,
            google_spreadsheet_credentials_path: None,
            spreadsheet_name: None,
            worksheet_name: None,
            sheet_owner: None,
            row_delay: "1s".to_string(),
            run_timeout: None,
            staging_path: PathBuf::from("tmp_report.csv"),
            skip_failed_backends: false,
        }
    }
}

/// Expected counts are written both as `7` and `"7"` in existing configs.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Text(t) => t,
    }))
}

/// Parse `6h`, `30m`, `60s` or `500ms`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || anyhow::anyhow!("Invalid duration format: {} (use e.g. 6h, 30m, 60s, 500ms)", s);
    let scaled = |n: &str, unit: u64| -> Result<Duration> {
        let secs = n.parse::<u64>()?.checked_mul(unit).ok_or_else(invalid)?;
        Ok(Duration::from_secs(secs))
    };

    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.parse::<u64>()?))
    } else if let Some(h) = s.strip_suffix('h') {
        scaled(h, 3600)
    } else if let Some(m) = s.strip_suffix('m') {
        scaled(m, 60)
    } else if let Some(s_val) = s.strip_suffix('s') {
        scaled(s_val, 1)
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration(" 60s ").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        let err = parse_duration("18446744073709551615h").unwrap_err();
        assert!(err.to_string().contains("Invalid duration format"));
        assert!(parse_duration("18446744073709551615m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_mode_from_flags() {
        let mut cfg = Config::default();
        assert!(cfg.mode().is_err());

        cfg.files_bucket = true;
        assert_eq!(cfg.mode().unwrap(), RunMode::Report(ReportSource::FilesBucket));

        cfg.collector = true;
        assert_eq!(cfg.mode().unwrap(), RunMode::Collect);
    }

    #[test]
    fn test_log_directive() {
        let mut cfg = Config::default();
        cfg.logging_level = "WARNING".to_string();
        assert_eq!(cfg.log_directive(), "warn");
        cfg.logging_level = "DEBUG".to_string();
        assert_eq!(cfg.log_directive(), "debug");
    }

    #[test]
    fn test_require() {
        assert_eq!(require(&Some("pg".to_string()), "container_name").unwrap(), "pg");
        assert!(require(&Some(String::new()), "container_name").is_err());
        assert!(require(&None, "container_name").is_err());
    }
}
