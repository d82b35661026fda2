//! Directory-backed buckets.
//!
//! Layout: `<root>/<bucket>/<sha256(key)>.json`, one self-contained JSON file
//! per entry with the body base64-encoded. Every file lands via rename, so a
//! reader never observes a half-written entry. Names starting with `.` under
//! the root are scratch space and never reported as buckets.
//!
//! Writers sharing a handle (or its clones) are serialised, so a `put` is
//! never lost to a concurrent `put_all` directory swap. Separate processes
//! writing the same root are not coordinated.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{fs, sync::Mutex};
use tracing::warn;
use uuid::Uuid;

use super::{CacheStorage, StorageError, validate_bucket_name};
use crate::cache::{keys::RequestKey, response::CachedResponse};

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    writes: Arc<Mutex<()>>,
}

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl DiskEntry {
    fn new(key: RequestKey, response: CachedResponse) -> Self {
        Self {
            key,
            status: response.status,
            headers: response.headers,
            body: STANDARD.encode(&response.body),
        }
    }

    fn into_response(self, path: &Path) -> Result<CachedResponse, StorageError> {
        let body = STANDARD
            .decode(self.body.as_bytes())
            .map_err(|err| StorageError::Corrupt {
                path: path.to_path_buf(),
                message: format!("invalid body encoding: {err}"),
            })?;
        Ok(CachedResponse {
            status: self.status,
            headers: self.headers,
            body: Bytes::from(body),
        })
    }
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn scratch_dir(&self, kind: &str) -> PathBuf {
        self.root.join(format!(".{kind}-{}", Uuid::new_v4().simple()))
    }

    async fn ensure_dir(path: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(path)
            .await
            .map_err(|err| StorageError::io(path, err))
    }

    /// Write `entry` into `dir` through a temp file and rename.
    async fn write_entry(dir: &Path, entry: &DiskEntry) -> Result<(), StorageError> {
        let target = dir.join(entry_file_name(&entry.key));
        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
        let payload = serde_json::to_vec(entry).map_err(|err| StorageError::Corrupt {
            path: target.clone(),
            message: format!("failed to encode entry: {err}"),
        })?;

        fs::write(&temp, payload)
            .await
            .map_err(|err| StorageError::io(&temp, err))?;
        if let Err(err) = fs::rename(&temp, &target).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!(
                    target = "precache::cache::disk",
                    path = %temp.display(),
                    error = %cleanup,
                    "failed to remove temp entry"
                );
            }
            return Err(StorageError::io(&target, err));
        }
        Ok(())
    }

    /// Copy committed entry files from `from` into `to`.
    async fn copy_entries(from: &Path, to: &Path) -> Result<(), StorageError> {
        let mut dir = fs::read_dir(from)
            .await
            .map_err(|err| StorageError::io(from, err))?;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|err| StorageError::io(from, err))?
        {
            let name = item.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let source = item.path();
            fs::copy(&source, to.join(&name))
                .await
                .map_err(|err| StorageError::io(&source, err))?;
        }
        Ok(())
    }

    async fn stage(
        staging: &Path,
        existing: Option<&Path>,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), StorageError> {
        Self::ensure_dir(staging).await?;
        if let Some(existing) = existing {
            Self::copy_entries(existing, staging).await?;
        }
        for (key, response) in entries {
            Self::write_entry(staging, &DiskEntry::new(key, response)).await?;
        }
        Ok(())
    }

    /// Replace `target` with `staging`, restoring the old directory on failure.
    async fn swap_in(&self, staging: &Path, target: &Path, existed: bool) -> Result<(), StorageError> {
        if !existed {
            return fs::rename(staging, target)
                .await
                .map_err(|err| StorageError::io(target, err));
        }

        let trash = self.scratch_dir("trash");
        fs::rename(target, &trash)
            .await
            .map_err(|err| StorageError::io(target, err))?;

        if let Err(err) = fs::rename(staging, target).await {
            if let Err(restore) = fs::rename(&trash, target).await {
                warn!(
                    target = "precache::cache::disk",
                    path = %target.display(),
                    error = %restore,
                    "failed to restore bucket after aborted swap"
                );
            }
            return Err(StorageError::io(target, err));
        }

        if let Err(err) = fs::remove_dir_all(&trash).await {
            warn!(
                target = "precache::cache::disk",
                path = %trash.display(),
                error = %err,
                "failed to remove replaced bucket directory"
            );
        }
        Ok(())
    }
}

fn entry_file_name(key: &RequestKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.method.as_bytes());
    hasher.update(b" ");
    hasher.update(key.url.as_bytes());
    format!("{}.{ENTRY_EXTENSION}", hex::encode(hasher.finalize().to_vec()))
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket)?;
        Self::ensure_dir(&dir).await
    }

    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), StorageError> {
        let target = self.bucket_dir(bucket)?;
        let _writes = self.writes.lock().await;
        Self::ensure_dir(&self.root).await?;

        let existed = fs::try_exists(&target)
            .await
            .map_err(|err| StorageError::io(&target, err))?;
        let staging = self.scratch_dir("staging");

        let staged = Self::stage(&staging, existed.then_some(target.as_path()), entries).await;
        let result = match staged {
            Ok(()) => self.swap_in(&staging, &target, existed).await,
            Err(err) => Err(err),
        };

        if result.is_err() {
            match fs::remove_dir_all(&staging).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(
                    target = "precache::cache::disk",
                    path = %staging.display(),
                    error = %err,
                    "failed to remove staging directory"
                ),
            }
        }
        result
    }

    async fn get(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        let path = self.bucket_dir(bucket)?.join(entry_file_name(key));
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(&path, err)),
        };

        let entry: DiskEntry =
            serde_json::from_slice(&raw).map_err(|err| StorageError::Corrupt {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if &entry.key != key {
            return Err(StorageError::Corrupt {
                path,
                message: format!("entry belongs to `{}`", entry.key),
            });
        }
        entry.into_response(&path).map(Some)
    }

    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket)?;
        let _writes = self.writes.lock().await;
        Self::ensure_dir(&dir).await?;
        Self::write_entry(&dir, &DiskEntry::new(key, response)).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        let _writes = self.writes.lock().await;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::io(&dir, err)),
        }
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StorageError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(&self.root, err)),
        };

        let mut names = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|err| StorageError::io(&self.root, err))?
        {
            let is_dir = item
                .file_type()
                .await
                .map_err(|err| StorageError::io(item.path(), err))?
                .is_dir();
            let name = item.file_name().to_string_lossy().into_owned();
            if is_dir && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
