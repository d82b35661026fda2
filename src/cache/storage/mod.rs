//! Bucket storage.
//!
//! `CacheStorage` is the seam between the manager and persisted buckets. A
//! bucket maps `RequestKey`s to `CachedResponse`s; individual operations are
//! atomic per key and `put_all` is atomic for the whole batch.

mod disk;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use super::{keys::RequestKey, response::CachedResponse};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid bucket name `{0}`")]
    InvalidBucketName(String),
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt entry at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    /// Create the bucket if it does not exist.
    async fn open(&self, bucket: &str) -> Result<(), StorageError>;

    /// Store every entry or none of them. Creates the bucket if needed.
    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), StorageError>;

    /// Look up an entry; a missing bucket reads as a miss.
    async fn get(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError>;

    /// Store or overwrite one entry. Creates the bucket if needed.
    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError>;

    /// Remove a bucket and everything in it. Returns whether it existed.
    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Names of all existing buckets, sorted.
    async fn bucket_names(&self) -> Result<Vec<String>, StorageError>;
}

/// Bucket names double as directory names for `DiskStorage`.
pub fn validate_bucket_name(bucket: &str) -> Result<(), StorageError> {
    let valid = !bucket.is_empty()
        && !bucket.starts_with('.')
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidBucketName(bucket.to_string()))
    }
}
