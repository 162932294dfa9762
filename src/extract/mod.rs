//! Backend extractors: each turns one backend's native metadata into a
//! [`BackupRecord`].

pub mod bucket;
pub mod walg;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::BucketConfig;
use crate::error::{CollectionCause, CollectionFailure};
use crate::exec::{docker_exec, CommandRunner, ProcessRunner};
use crate::record::BackupRecord;
use crate::storage::{ObjectStore, S3Location, S3Store, StorageError};

pub use bucket::FileMask;

/// Access to the outside world an extractor needs.
#[async_trait]
pub trait Connector: Send + Sync {
    fn runner(&self) -> &dyn CommandRunner;

    /// Object store client for one bucket descriptor.
    async fn store(&self, bucket: &BucketConfig) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

/// Local processes and real S3.
#[derive(Debug, Default)]
pub struct LiveConnector {
    runner: ProcessRunner,
}

#[async_trait]
impl Connector for LiveConnector {
    fn runner(&self) -> &dyn CommandRunner {
        &self.runner
    }

    async fn store(&self, bucket: &BucketConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
        Ok(Arc::new(S3Store::connect(bucket).await))
    }
}

/// Fixed runner and a single shared store, whatever the bucket credentials.
pub struct FixedConnector<R> {
    pub runner: R,
    pub store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl<R: CommandRunner> Connector for FixedConnector<R> {
    fn runner(&self) -> &dyn CommandRunner {
        &self.runner
    }

    async fn store(&self, _bucket: &BucketConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
        Ok(Arc::clone(&self.store))
    }
}

/// The known backup sources.
#[derive(Debug, Clone)]
pub enum Backend {
    /// WAL-G inside a Postgres container; `metadata_path` is where its
    /// backups (and metadata document) live.
    ContainerBackup {
        container: String,
        metadata_path: String,
    },
    /// Plain files in a bucket, filtered by file name. `ignore` is a full
    /// object key left out of the listing, usually the metadata document.
    BucketListing {
        bucket: BucketConfig,
        mask: FileMask,
        ignore: Option<String>,
    },
    /// A metadata document previously uploaded by a reporter.
    MetadataDocument { bucket: BucketConfig },
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Backend::ContainerBackup { container, .. } => write!(f, "container {}", container),
            Backend::BucketListing { bucket, mask, .. } => {
                write!(f, "{} ({})", bucket.s3_path, mask.as_str())
            }
            Backend::MetadataDocument { bucket } => write!(f, "{}", bucket.s3_path),
        }
    }
}

impl Backend {
    /// Produce this backend's record. Failures are not retried.
    pub async fn collect(&self, connector: &dyn Connector) -> Result<BackupRecord, CollectionFailure> {
        tracing::info!("Gather metadata from {} ...", self);
        let record = self
            .gather(connector)
            .await
            .map_err(|cause| CollectionFailure::new(self.to_string(), cause))?;
        tracing::info!("Gather metadata from {} complete", self);
        Ok(record)
    }

    async fn gather(&self, connector: &dyn Connector) -> Result<BackupRecord, CollectionCause> {
        match self {
            Backend::ContainerBackup {
                container,
                metadata_path,
            } => {
                let placement = S3Location::parse(metadata_path)?.bucket_url();
                let args = docker_exec(container, walg::BACKUP_LIST_COMMAND);
                let output = connector.runner().run(&args).await?;
                walg::summarize(&output, &placement)
            }
            Backend::BucketListing {
                bucket,
                mask,
                ignore,
            } => {
                let location = S3Location::parse(&bucket.s3_path)?;
                let store = connector.store(bucket).await?;
                let mut objects = store.list_objects(&location).await?;
                if let Some(ignore) = ignore {
                    objects.retain(|o| &o.key != ignore);
                }
                Ok(bucket::summarize(&objects, mask, &location.to_string()))
            }
            Backend::MetadataDocument { bucket } => {
                let location = S3Location::parse(&bucket.s3_path)?;
                let store = connector.store(bucket).await?;
                let body = store.get_object(&location).await?;
                let doc: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
                    CollectionCause::Malformed(format!("metadata is not valid JSON: {e}"))
                })?;
                let raw = doc.as_object().ok_or_else(|| {
                    CollectionCause::Malformed("metadata document is not a JSON object".to_string())
                })?;
                Ok(BackupRecord::from_raw(raw))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedRunner;
    use crate::record::{BackendType, BackupCount};
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn connector(store: Arc<MemoryStore>) -> FixedConnector<ScriptedRunner> {
        FixedConnector {
            runner: ScriptedRunner::new(),
            store,
        }
    }

    fn bucket(path: &str) -> BucketConfig {
        BucketConfig {
            s3_path: path.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_container_backup() {
        let conn = connector(Arc::new(MemoryStore::new()));
        conn.runner.respond(
            &docker_exec("pg", walg::BACKUP_LIST_COMMAND),
            json!([{
                "backup_name": "base_000000010000000000000003",
                "time": "2024-06-01T02:00:00Z",
                "wal_file_name": "000000010000000000000003",
                "compressed_size": 1048576
            }])
            .to_string(),
        );

        let backend = Backend::ContainerBackup {
            container: "pg".to_string(),
            metadata_path: "s3://acme-pg/meta/pg.json".to_string(),
        };
        let record = backend.collect(&conn).await.unwrap();

        assert_eq!(record.placement.value().map(String::as_str), Some("s3://acme-pg"));
        assert_eq!(
            record.observed_backup_count.value(),
            Some(&BackupCount::split(1, 0))
        );
        assert!(record.duration.is_unknown());
    }

    #[tokio::test]
    async fn test_container_exec_failure_names_backend() {
        let conn = connector(Arc::new(MemoryStore::new()));
        conn.runner
            .fail(&docker_exec("pg", walg::BACKUP_LIST_COMMAND), 1, "no such container");

        let backend = Backend::ContainerBackup {
            container: "pg".to_string(),
            metadata_path: "s3://acme-pg/meta.json".to_string(),
        };
        let err = backend.collect(&conn).await.unwrap_err();

        assert_eq!(err.backend, "container pg");
        assert!(matches!(err.cause, CollectionCause::Exec { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_bucket_listing() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for name in ["a.tar.gz", "b.tar.gz", "readme.md"] {
            store.insert(S3Location::parse(&format!("s3://files/site/{name}")).unwrap(), "x", now);
        }

        let backend = Backend::BucketListing {
            bucket: bucket("s3://files/site/"),
            mask: FileMask::new("*.tar.gz").unwrap(),
            ignore: None,
        };
        let record = backend.collect(&connector(store)).await.unwrap();

        assert_eq!(record.backend_type.value(), Some(&BackendType::FilesBucket));
        assert_eq!(record.observed_backup_count.value(), Some(&BackupCount::plain(2)));
        assert_eq!(record.placement.value().map(String::as_str), Some("s3://files/site/"));
    }

    #[tokio::test]
    async fn test_metadata_document() {
        let store = Arc::new(MemoryStore::new());
        let loc = S3Location::parse("s3://meta/acme.json").unwrap();
        store.insert(
            loc,
            json!({"customer": "acme", "count_of_backups": 4}).to_string(),
            Utc::now(),
        );

        let backend = Backend::MetadataDocument {
            bucket: bucket("s3://meta/acme.json"),
        };
        let record = backend.collect(&connector(store)).await.unwrap();

        assert_eq!(record.customer.value().map(String::as_str), Some("acme"));
        assert!(record.backend_type.is_unknown());
    }

    #[tokio::test]
    async fn test_metadata_document_failures() {
        let store = Arc::new(MemoryStore::new());
        store.insert(S3Location::parse("s3://meta/list.json").unwrap(), "[1, 2]", Utc::now());
        let conn = connector(store);

        let not_object = Backend::MetadataDocument {
            bucket: bucket("s3://meta/list.json"),
        };
        assert!(matches!(
            not_object.collect(&conn).await.unwrap_err().cause,
            CollectionCause::Malformed(_)
        ));

        let missing = Backend::MetadataDocument {
            bucket: bucket("s3://meta/missing.json"),
        };
        assert!(matches!(
            missing.collect(&conn).await.unwrap_err().cause,
            CollectionCause::Storage(StorageError::NotFound(_))
        ));
    }
}
