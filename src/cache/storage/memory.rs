use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use async_trait::async_trait;

use super::{CacheStorage, StorageError, validate_bucket_name};
use crate::cache::{
    keys::RequestKey,
    lock::{rw_read, rw_write},
    response::CachedResponse,
};

type Bucket = HashMap<RequestKey, CachedResponse>;

/// In-process bucket storage. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: RwLock<BTreeMap<String, Bucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a bucket, if it exists.
    pub fn len(&self, bucket: &str) -> Option<usize> {
        rw_read(&self.buckets, "memory.len")
            .get(bucket)
            .map(HashMap::len)
    }

    /// Snapshot of a bucket's contents, sorted by key.
    pub fn entries(&self, bucket: &str) -> Vec<(RequestKey, CachedResponse)> {
        let guard = rw_read(&self.buckets, "memory.entries");
        let mut entries: Vec<_> = guard
            .get(bucket)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, bucket: &str) -> Result<(), StorageError> {
        validate_bucket_name(bucket)?;
        rw_write(&self.buckets, "memory.open")
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), StorageError> {
        validate_bucket_name(bucket)?;
        // One write guard covers the whole batch.
        rw_write(&self.buckets, "memory.put_all")
            .entry(bucket.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn get(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        Ok(rw_read(&self.buckets, "memory.get")
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned())
    }

    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        validate_bucket_name(bucket)?;
        rw_write(&self.buckets, "memory.put")
            .entry(bucket.to_string())
            .or_default()
            .insert(key, response);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        Ok(rw_write(&self.buckets, "memory.delete_bucket")
            .remove(bucket)
            .is_some())
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(rw_read(&self.buckets, "memory.bucket_names")
            .keys()
            .cloned()
            .collect())
    }
}
