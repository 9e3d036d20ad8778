use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

use super::{ObjectStore, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-process object store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    failing_keys: RwLock<HashSet<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `put` to `key` fail with a backend error
    pub async fn fail_writes_to(&self, key: impl Into<String>) {
        self.failing_keys.write().await.insert(key.into());
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub async fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.content_type.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if self.failing_keys.read().await.contains(key) {
            return Err(StorageError::Backend {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "write rejected".to_string(),
            });
        }

        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.bytes.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}
