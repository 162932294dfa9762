use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};

use super::{ObjectStore, ObjectSummary, S3Location, StorageError};
use crate::config::BucketConfig;

/// S3 (or S3-compatible) object store.
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from a bucket descriptor.
    ///
    /// Explicit keys win; without them the default AWS credential chain is
    /// used. A custom endpoint switches to path-style addressing, which most
    /// S3-compatible services expect.
    pub async fn connect(bucket: &BucketConfig) -> Self {
        let client = match (&bucket.aws_access_key_id, &bucket.aws_secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let mut builder = Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(Credentials::new(
                        key_id,
                        secret,
                        None,
                        None,
                        "backup-reporter",
                    ));
                if let Some(region) = &bucket.aws_region {
                    builder = builder.region(Region::new(region.clone()));
                }
                if let Some(endpoint) = &bucket.aws_endpoint_url {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Client::from_conf(builder.build())
            }
            _ => {
                let mut loader = aws_config::defaults(BehaviorVersion::latest());
                if let Some(region) = &bucket.aws_region {
                    loader = loader.region(Region::new(region.clone()));
                }
                if let Some(endpoint) = &bucket.aws_endpoint_url {
                    loader = loader.endpoint_url(endpoint);
                }
                let shared = loader.load().await;
                let conf = aws_sdk_s3::config::Builder::from(&shared)
                    .force_path_style(bucket.aws_endpoint_url.is_some())
                    .build();
                Client::from_conf(conf)
            }
        };
        Self { client }
    }
}

fn request_error(
    operation: &'static str,
    location: &S3Location,
    err: impl std::error::Error,
) -> StorageError {
    StorageError::Request {
        operation,
        location: location.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, location: &S3Location) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::NotFound(location.to_string())
                } else {
                    request_error("get", location, e)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| request_error("read", location, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_object(&self, location: &S3Location, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("put", location, e))?;
        tracing::debug!("Uploaded {}", location);
        Ok(())
    }

    async fn list_objects(
        &self,
        location: &S3Location,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&location.bucket)
                .prefix(&location.key)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| request_error("list", location, e))?;

            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                let last_modified = obj
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_default();
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    last_modified,
                    size_bytes: obj.size().unwrap_or(0).max(0) as u64,
                });
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        tracing::debug!("Listed {} objects under {}", objects.len(), location);
        Ok(objects)
    }
}
