//! Resource cache manager.
//!
//! One manager owns one version's bucket. `install` fills it from the manifest
//! (all or nothing), `activate` evicts every other version's bucket, and
//! `handle_fetch` serves eligible requests:
//!
//! - navigations (`/` and `*.html`) stale-while-revalidate,
//! - everything else cache-first.
//!
//! Non-GET and cross-origin requests are handed back untouched.

use std::sync::{Arc, RwLock};

use axum::http::Method;
use futures::future::{join_all, try_join_all};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::{
    config::{CacheConfig, ManifestError},
    fetch::{FetchError, Fetcher},
    keys::{RequestClass, RequestKey, ResourceRequest},
    lifecycle::WorkerState,
    lock::{rw_read, rw_write},
    response::CachedResponse,
    storage::{CacheStorage, StorageError},
};

const METRIC_CACHE_HIT: &str = "precache_cache_hit_total";
const METRIC_CACHE_MISS: &str = "precache_cache_miss_total";
const METRIC_REVALIDATE: &str = "precache_revalidate_total";
const METRIC_NETWORK_ERROR: &str = "precache_network_error_total";
const METRIC_BUCKET_EVICTED: &str = "precache_bucket_evicted_total";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("manifest entry `{path}` could not be fetched: {source}")]
    Network {
        path: String,
        #[source]
        source: FetchError,
    },
    #[error("manifest entry `{path}` returned status {status}")]
    Status { path: String, status: u16 },
    #[error("failed to commit bucket `{bucket}`: {source}")]
    Storage {
        bucket: String,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("install failed: {0}")]
    Install(#[from] InstallError),
    #[error("cannot {op} while the cache is {state}")]
    InvalidState {
        op: &'static str,
        state: WorkerState,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub bucket: String,
    pub entries: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub bucket: String,
    pub evicted: Vec<String>,
    pub failed: Vec<String>,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "hit",
            Self::Network => "miss",
        }
    }
}

/// Bucket work left running after a navigation was answered: the refresh
/// after a hit, or the write after a miss.
///
/// Dropping the handle detaches the task; awaiting `settled` waits for it.
#[derive(Debug)]
pub struct BackgroundTask {
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    pub async fn settled(self) {
        if let Err(err) = self.handle.await {
            warn!(
                target = "precache::cache::manager",
                error = %err,
                "background bucket task did not complete"
            );
        }
    }
}

#[derive(Debug)]
pub struct Served {
    pub response: CachedResponse,
    pub source: ResponseSource,
    pub background: Option<BackgroundTask>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// Not eligible for caching; the caller forwards it as-is.
    Passthrough(ResourceRequest),
    Served(Served),
}

struct Inner {
    config: CacheConfig,
    bucket: String,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<WorkerState>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResourceCacheManager {
    inner: Arc<Inner>,
}

impl ResourceCacheManager {
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let bucket = config.bucket_name();
        Self {
            inner: Arc::new(Inner {
                config,
                bucket,
                storage,
                fetcher,
                state: RwLock::new(WorkerState::Parsed),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.inner.storage
    }

    pub fn state(&self) -> WorkerState {
        *rw_read(&self.inner.state, "manager.state")
    }

    fn set_state(&self, next: WorkerState) {
        *rw_write(&self.inner.state, "manager.set_state") = next;
    }

    /// Atomically check `allowed` and move to `next`.
    fn transition(
        &self,
        op: &'static str,
        allowed: fn(WorkerState) -> bool,
        next: WorkerState,
    ) -> Result<(), ManagerError> {
        let mut state = rw_write(&self.inner.state, "manager.transition");
        if !allowed(*state) {
            return Err(ManagerError::InvalidState { op, state: *state });
        }
        *state = next;
        Ok(())
    }

    pub(crate) fn retire(&self) {
        self.set_state(WorkerState::Redundant);
    }

    /// Fetch the whole manifest and commit it as this version's bucket.
    ///
    /// On failure nothing from this attempt is kept and the manager becomes
    /// redundant. On success it is immediately eligible for activation.
    #[instrument(skip_all, fields(bucket = %self.bucket()))]
    pub async fn install(&self) -> Result<InstallReport, ManagerError> {
        self.transition(
            "install",
            WorkerState::can_install,
            WorkerState::Installing,
        )?;

        match self.populate().await {
            Ok(report) => {
                self.set_state(WorkerState::Installed);
                info!(
                    target = "precache::cache::manager",
                    entries = report.entries,
                    "bucket installed; skipping wait"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_state(WorkerState::Redundant);
                warn!(
                    target = "precache::cache::manager",
                    error = %err,
                    "install aborted"
                );
                Err(err.into())
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport, InstallError> {
        let requests = self.inner.config.manifest_requests()?;
        let fetcher = &self.inner.fetcher;

        let fetches = requests.into_iter().map(|(path, request)| async move {
            let response = fetcher
                .fetch(&request)
                .await
                .map_err(|source| InstallError::Network {
                    path: path.clone(),
                    source,
                })?;
            if !response.is_ok() {
                return Err(InstallError::Status {
                    path,
                    status: response.status,
                });
            }
            Ok::<_, InstallError>((RequestKey::from_request(&request), response.for_storage()))
        });
        let entries = try_join_all(fetches).await?;
        let count = entries.len();

        let bucket = self.bucket();
        let storage = &self.inner.storage;
        let storage_error = |source| InstallError::Storage {
            bucket: bucket.to_string(),
            source,
        };

        let existed = storage
            .bucket_names()
            .await
            .map_err(storage_error)?
            .iter()
            .any(|name| name == bucket);

        let committed = match storage.open(bucket).await {
            Ok(()) => storage.put_all(bucket, entries).await,
            Err(err) => Err(err),
        };

        if let Err(source) = committed {
            if !existed {
                if let Err(err) = storage.delete_bucket(bucket).await {
                    warn!(
                        target = "precache::cache::manager",
                        error = %err,
                        "failed to roll back partially created bucket"
                    );
                }
            }
            return Err(storage_error(source));
        }

        Ok(InstallReport {
            bucket: bucket.to_string(),
            entries: count,
        })
    }

    /// Evict every bucket that is not this version's, then start serving.
    ///
    /// Eviction failures are reported but never stop activation.
    #[instrument(skip_all, fields(bucket = %self.bucket()))]
    pub async fn activate(&self) -> Result<ActivationReport, ManagerError> {
        self.transition(
            "activate",
            WorkerState::can_activate,
            WorkerState::Activating,
        )?;

        let current = self.bucket();
        let storage = &self.inner.storage;
        let mut report = ActivationReport {
            bucket: current.to_string(),
            ..Default::default()
        };

        match storage.bucket_names().await {
            Ok(names) => {
                let stale: Vec<String> = names.into_iter().filter(|n| n != current).collect();
                let results = join_all(stale.iter().map(|name| storage.delete_bucket(name))).await;
                for (name, result) in stale.into_iter().zip(results) {
                    match result {
                        Ok(_) => {
                            counter!(METRIC_BUCKET_EVICTED).increment(1);
                            info!(
                                target = "precache::cache::manager",
                                evicted = %name,
                                "evicted stale bucket"
                            );
                            report.evicted.push(name);
                        }
                        Err(err) => {
                            warn!(
                                target = "precache::cache::manager",
                                bucket_name = %name,
                                error = %err,
                                "failed to evict stale bucket"
                            );
                            report.failed.push(name);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(
                    target = "precache::cache::manager",
                    error = %err,
                    "failed to list buckets; skipping eviction"
                );
            }
        }

        self.set_state(WorkerState::Activated);
        Ok(report)
    }

    /// Serve one intercepted request.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn handle_fetch(&self, request: ResourceRequest) -> Result<FetchOutcome, ManagerError> {
        let state = self.state();
        if state != WorkerState::Activated {
            return Err(ManagerError::InvalidState {
                op: "handle_fetch",
                state,
            });
        }

        if request.method != Method::GET || !self.inner.config.is_same_origin(&request.url) {
            debug!(outcome = "passthrough", "request not eligible for caching");
            return Ok(FetchOutcome::Passthrough(request));
        }

        let class = request.class();
        let key = RequestKey::from_request(&request);
        let served = match class {
            RequestClass::Navigation => self.stale_while_revalidate(request, key).await?,
            RequestClass::Asset => self.cache_first(request, key).await?,
        };

        debug!(
            strategy = class.as_str(),
            outcome = served.source.as_str(),
            status = served.response.status,
            "served"
        );
        Ok(FetchOutcome::Served(served))
    }

    async fn cache_first(
        &self,
        request: ResourceRequest,
        key: RequestKey,
    ) -> Result<Served, FetchError> {
        if let Some(cached) = self.lookup(&key, RequestClass::Asset).await {
            return Ok(Served {
                response: cached,
                source: ResponseSource::Cache,
                background: None,
            });
        }

        let response = self.fetch_network(&request).await?;
        if response.is_storable() {
            self.store(key, response.for_storage()).await;
        }
        Ok(Served {
            response,
            source: ResponseSource::Network,
            background: None,
        })
    }

    async fn stale_while_revalidate(
        &self,
        request: ResourceRequest,
        key: RequestKey,
    ) -> Result<Served, FetchError> {
        match self.lookup(&key, RequestClass::Navigation).await {
            Some(cached) => {
                let revalidation = self.spawn_revalidation(request, key);
                Ok(Served {
                    response: cached,
                    source: ResponseSource::Cache,
                    background: Some(revalidation),
                })
            }
            None => {
                // The response does not wait on the bucket write.
                let response = self.fetch_network(&request).await?;
                let background = response
                    .is_storable()
                    .then(|| self.spawn_store(key, response.for_storage()));
                Ok(Served {
                    response,
                    source: ResponseSource::Network,
                    background,
                })
            }
        }
    }

    fn spawn_store(&self, key: RequestKey, response: CachedResponse) -> BackgroundTask {
        let manager = self.clone();
        let span = info_span!("fill", key = %key);
        let handle = tokio::spawn(async move { manager.store(key, response).await }.instrument(span));
        BackgroundTask { handle }
    }

    fn spawn_revalidation(&self, request: ResourceRequest, key: RequestKey) -> BackgroundTask {
        counter!(METRIC_REVALIDATE).increment(1);
        let manager = self.clone();
        let span = info_span!("revalidate", url = %request.url);
        let handle = tokio::spawn(
            async move {
                match manager.fetch_network(&request).await {
                    Ok(response) if response.is_storable() => {
                        manager.store(key, response.for_storage()).await;
                        debug!("cached entry refreshed");
                    }
                    Ok(response) => {
                        debug!(
                            status = response.status,
                            "refresh not successful; keeping cached entry"
                        );
                    }
                    Err(err) => {
                        debug!(error = %err, "refresh failed; keeping cached entry");
                    }
                }
            }
            .instrument(span),
        );
        BackgroundTask { handle }
    }

    /// Storage read errors count as a miss.
    async fn lookup(&self, key: &RequestKey, class: RequestClass) -> Option<CachedResponse> {
        let found = match self.inner.storage.get(self.bucket(), key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    target = "precache::cache::manager",
                    key = %key,
                    error = %err,
                    "bucket read failed; treating as miss"
                );
                None
            }
        };
        let metric = if found.is_some() {
            METRIC_CACHE_HIT
        } else {
            METRIC_CACHE_MISS
        };
        counter!(metric, "strategy" => class.as_str()).increment(1);
        found
    }

    /// Storage write errors never change the response. A retired manager's
    /// bucket has been evicted and is not written again.
    async fn store(&self, key: RequestKey, response: CachedResponse) {
        if self.state() == WorkerState::Redundant {
            debug!(key = %key, "manager retired; dropping bucket write");
            return;
        }
        if let Err(err) = self.inner.storage.put(self.bucket(), key.clone(), response).await {
            warn!(
                target = "precache::cache::manager",
                key = %key,
                error = %err,
                "bucket write failed"
            );
        }
    }

    async fn fetch_network(&self, request: &ResourceRequest) -> Result<CachedResponse, FetchError> {
        self.inner.fetcher.fetch(request).await.inspect_err(|_| {
            counter!(METRIC_NETWORK_ERROR).increment(1);
        })
    }
}
