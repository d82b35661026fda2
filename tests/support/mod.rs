//! Fakes shared by the integration tests: a scripted origin and a storage
//! wrapper whose operations can be made to fail.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use precache::cache::{
    CacheConfig, CacheStorage, CachedResponse, DEFAULT_MANIFEST, FetchError, Fetcher,
    MemoryStorage, RequestKey, ResourceCacheManager, ResourceRequest, StorageError,
};
use tokio::sync::Notify;
use url::Url;

pub const ORIGIN: &str = "https://m0rtyn.cc";

pub fn origin() -> Url {
    Url::parse(ORIGIN).expect("valid origin")
}

pub fn url(path: &str) -> Url {
    origin().join(path).expect("valid path")
}

pub fn config(version: &str) -> CacheConfig {
    CacheConfig {
        version: version.to_string(),
        ..CacheConfig::new(origin())
    }
}

pub fn get(path: &str) -> ResourceRequest {
    ResourceRequest::get(url(path))
}

pub fn key(path: &str) -> RequestKey {
    RequestKey::from_request(&get(path))
}

pub fn bucket(version: &str) -> String {
    config(version).bucket_name()
}

/// Scripted origin. Unscripted paths answer `404`.
#[derive(Default)]
pub struct FakeOrigin {
    routes: Mutex<HashMap<String, Result<CachedResponse, String>>>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Origin that serves every default manifest entry with `"{path} {tag}"`.
    pub fn with_manifest(tag: &str) -> Arc<Self> {
        let origin = Self::new();
        for path in DEFAULT_MANIFEST {
            origin.serve(path, 200, format!("{path} {tag}"));
        }
        origin
    }

    pub fn serve(&self, path: &str, status: u16, body: impl Into<String>) {
        let response = CachedResponse::new(status, body.into()).with_header("content-type", "text/plain");
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), Ok(response));
    }

    pub fn serve_response(&self, path: &str, response: CachedResponse) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), Ok(response));
    }

    pub fn fail(&self, path: &str) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), Err("connection reset".to_string()));
    }

    /// Hold every subsequent fetch until the returned `Notify` is signalled.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    pub fn calls_for(&self, method: &str, path: &str) -> usize {
        let wanted = format!("{method} {}", url(path));
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|call| **call == wanted)
            .count()
    }
}

#[async_trait]
impl Fetcher for FakeOrigin {
    async fn fetch(&self, request: &ResourceRequest) -> Result<CachedResponse, FetchError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{} {}", request.method, request.url));

        let gate = self.gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let path = match request.url.query() {
            Some(query) => format!("{}?{query}", request.url.path()),
            None => request.url.path().to_string(),
        };
        let route = self.routes.lock().expect("routes lock").get(&path).cloned();
        match route {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(FetchError::new(request.url.as_str(), message)),
            None => Ok(CachedResponse::new(404, "not found")),
        }
    }
}

/// Memory storage with switchable failures.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryStorage,
    fail_put_all: AtomicBool,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    undeletable: Mutex<HashSet<String>>,
    put_gate: Mutex<Option<Arc<Notify>>>,
}

impl FlakyStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_put_all(&self) {
        self.fail_put_all.store(true, Ordering::SeqCst);
    }

    pub fn fail_get(&self) {
        self.fail_get.store(true, Ordering::SeqCst);
    }

    pub fn fail_put(&self) {
        self.fail_put.store(true, Ordering::SeqCst);
    }

    /// Hold every subsequent `put` until the returned `Notify` is signalled.
    pub fn hold_put(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.put_gate.lock().expect("put gate lock") = Some(Arc::clone(&gate));
        gate
    }

    pub fn protect(&self, bucket: &str) {
        self.undeletable
            .lock()
            .expect("undeletable lock")
            .insert(bucket.to_string());
    }

    fn injected(bucket: &str) -> StorageError {
        StorageError::Io {
            path: bucket.into(),
            source: std::io::Error::other("injected failure"),
        }
    }
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn open(&self, bucket: &str) -> Result<(), StorageError> {
        self.inner.open(bucket).await
    }

    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, CachedResponse)>,
    ) -> Result<(), StorageError> {
        if self.fail_put_all.load(Ordering::SeqCst) {
            return Err(Self::injected(bucket));
        }
        self.inner.put_all(bucket, entries).await
    }

    async fn get(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, StorageError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::injected(bucket));
        }
        self.inner.get(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), StorageError> {
        let gate = self.put_gate.lock().expect("put gate lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(Self::injected(bucket));
        }
        self.inner.put(bucket, key, response).await
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, StorageError> {
        if self
            .undeletable
            .lock()
            .expect("undeletable lock")
            .contains(bucket)
        {
            return Err(Self::injected(bucket));
        }
        self.inner.delete_bucket(bucket).await
    }

    async fn bucket_names(&self) -> Result<Vec<String>, StorageError> {
        self.inner.bucket_names().await
    }
}

pub fn manager(
    version: &str,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
) -> ResourceCacheManager {
    ResourceCacheManager::new(config(version), storage, fetcher)
}

/// Install and activate a manager for `version`.
pub async fn activated(
    version: &str,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
) -> ResourceCacheManager {
    let manager = manager(version, storage, fetcher);
    manager.install().await.expect("install succeeds");
    manager.activate().await.expect("activate succeeds");
    manager
}
