use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ObjectStore, ObjectSummary, S3Location, StorageError};

/// In-process object store, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<S3Location, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: S3Location, body: impl Into<Vec<u8>>, modified: DateTime<Utc>) {
        self.lock().insert(location, (body.into(), modified));
    }

    pub fn get(&self, location: &S3Location) -> Option<Vec<u8>> {
        self.lock().get(location).map(|(body, _)| body.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<S3Location, (Vec<u8>, DateTime<Utc>)>> {
        // A poisoned map still holds consistent entries; each insert is a single call.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, location: &S3Location) -> Result<Vec<u8>, StorageError> {
        self.get(location)
            .ok_or_else(|| StorageError::NotFound(location.to_string()))
    }

    async fn put_object(&self, location: &S3Location, body: Vec<u8>) -> Result<(), StorageError> {
        self.insert(location.clone(), body, Utc::now());
        Ok(())
    }

    async fn list_objects(
        &self,
        location: &S3Location,
    ) -> Result<Vec<ObjectSummary>, StorageError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(loc, _)| loc.bucket == location.bucket && loc.key.starts_with(&location.key))
            .map(|(loc, (body, modified))| ObjectSummary {
                key: loc.key.clone(),
                last_modified: *modified,
                size_bytes: body.len() as u64,
            })
            .collect())
    }
}
