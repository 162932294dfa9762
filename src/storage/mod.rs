use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

mod memory;
mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage path '{0}' (expected s3://bucket/key)")]
    InvalidPath(String),

    #[error("{operation} {location} failed: {message}")]
    Request {
        operation: &'static str,
        location: String,
        message: String,
    },

    #[error("object {0} not found")]
    NotFound(String),
}

/// A bucket plus a key (or key prefix), written `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let rest = path
            .strip_prefix("s3://")
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// `s3://bucket`, used as the placement of everything in the bucket.
    pub fn bucket_url(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    /// The "directory" holding this key: everything up to and including the
    /// last `/`.
    pub fn parent(&self) -> S3Location {
        let key = match self.key.rfind('/') {
            Some(i) => &self.key[..=i],
            None => "",
        };
        S3Location {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "s3://{}", self.bucket)
        } else {
            write!(f, "s3://{}/{}", self.bucket, self.key)
        }
    }
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size_bytes: u64,
}

impl ObjectSummary {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Object storage holding backups and metadata documents.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, location: &S3Location) -> Result<Vec<u8>, StorageError>;

    async fn put_object(&self, location: &S3Location, body: Vec<u8>) -> Result<(), StorageError>;

    /// Every object whose key starts with `location.key`, across all pages.
    async fn list_objects(&self, location: &S3Location)
        -> Result<Vec<ObjectSummary>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let loc = S3Location::parse("s3://acme-backups/pg/metadata.json").unwrap();
        assert_eq!(loc.bucket, "acme-backups");
        assert_eq!(loc.key, "pg/metadata.json");
        assert_eq!(loc.bucket_url(), "s3://acme-backups");
        assert_eq!(loc.to_string(), "s3://acme-backups/pg/metadata.json");

        let root = S3Location::parse("s3://acme-backups").unwrap();
        assert_eq!(root.key, "");
        assert_eq!(root.to_string(), "s3://acme-backups");
    }

    #[test]
    fn test_parent() {
        let loc = S3Location::parse("s3://files/site/meta.json").unwrap();
        assert_eq!(loc.parent().to_string(), "s3://files/site/");
        let top = S3Location::parse("s3://files/meta.json").unwrap();
        assert_eq!(top.parent().to_string(), "s3://files");
    }

    #[test]
    fn test_reject_bad_locations() {
        assert!(S3Location::parse("acme-backups/pg").is_err());
        assert!(S3Location::parse("s3:///pg").is_err());
    }

    #[test]
    fn test_file_name() {
        let obj = ObjectSummary {
            key: "dumps/2024/db-01.sql.gz".to_string(),
            last_modified: Utc::now(),
            size_bytes: 1,
        };
        assert_eq!(obj.file_name(), "db-01.sql.gz");
    }
}
