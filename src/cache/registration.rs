//! Controller registration.
//!
//! Decides which manager serves traffic. A new version only takes control
//! after it installed and activated; until then the previous controller keeps
//! serving from its own bucket.

use std::sync::RwLock;

use tracing::{debug, info, warn};

use super::{
    keys::ResourceRequest,
    lifecycle::WorkerState,
    lock::{rw_read, rw_write},
    manager::{ActivationReport, FetchOutcome, InstallReport, ManagerError, ResourceCacheManager},
};

#[derive(Debug, Clone)]
pub struct UpgradeReport {
    pub install: InstallReport,
    pub activation: ActivationReport,
    pub replaced: Option<String>,
}

#[derive(Default)]
pub struct Registration {
    controller: RwLock<Option<ResourceCacheManager>>,
}

impl Registration {
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager currently serving requests, if any.
    pub fn controller(&self) -> Option<ResourceCacheManager> {
        rw_read(&self.controller, "registration.controller").clone()
    }

    /// Route a request through the current controller. Without one the
    /// request passes through untouched.
    pub async fn handle_fetch(&self, request: ResourceRequest) -> Result<FetchOutcome, ManagerError> {
        match self.controller() {
            Some(manager) => self.dispatch(manager, request).await,
            None => Ok(FetchOutcome::Passthrough(request)),
        }
    }

    /// Serve through `manager`. If it was retired after being read, the
    /// request goes to whichever controller replaced it.
    async fn dispatch(
        &self,
        manager: ResourceCacheManager,
        request: ResourceRequest,
    ) -> Result<FetchOutcome, ManagerError> {
        match manager.handle_fetch(request.clone()).await {
            Err(ManagerError::InvalidState {
                state: WorkerState::Redundant,
                ..
            }) => {
                debug!(
                    target = "precache::cache::registration",
                    retired_bucket = manager.bucket(),
                    "controller replaced mid-request; retrying"
                );
                match self.controller() {
                    Some(current) => current.handle_fetch(request).await,
                    None => Ok(FetchOutcome::Passthrough(request)),
                }
            }
            outcome => outcome,
        }
    }

    /// Install and activate `manager`, then claim every client for it.
    ///
    /// If install fails the current controller is left in place.
    pub async fn register(
        &self,
        manager: ResourceCacheManager,
    ) -> Result<UpgradeReport, ManagerError> {
        let install = match manager.install().await {
            Ok(report) => report,
            Err(err) => {
                if let Some(current) = self.controller() {
                    warn!(
                        target = "precache::cache::registration",
                        failed_bucket = manager.bucket(),
                        serving_bucket = current.bucket(),
                        "upgrade failed; previous version keeps serving"
                    );
                }
                return Err(err);
            }
        };
        let activation = manager.activate().await?;

        let previous = rw_write(&self.controller, "registration.claim").replace(manager.clone());
        let replaced = previous.map(|old| {
            old.retire();
            old.bucket().to_string()
        });

        info!(
            target = "precache::cache::registration",
            bucket = manager.bucket(),
            replaced = replaced.as_deref().unwrap_or(""),
            "claimed clients"
        );

        Ok(UpgradeReport {
            install,
            activation,
            replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::cache::{
        CacheConfig, CachedResponse, FetchError, Fetcher, MemoryStorage, ResponseSource,
    };

    struct Tagged(&'static str);

    #[async_trait]
    impl Fetcher for Tagged {
        async fn fetch(&self, request: &ResourceRequest) -> Result<CachedResponse, FetchError> {
            Ok(CachedResponse::new(200, format!("{} {}", request.url.path(), self.0)))
        }
    }

    fn manager(version: &str, storage: &Arc<MemoryStorage>) -> ResourceCacheManager {
        let origin = Url::parse("https://m0rtyn.cc").expect("valid origin");
        let config = CacheConfig {
            version: version.to_string(),
            ..CacheConfig::new(origin)
        };
        let tag = if version == "v6" { "old" } else { "new" };
        ResourceCacheManager::new(config, storage.clone(), Arc::new(Tagged(tag)))
    }

    fn get(path: &str) -> ResourceRequest {
        let url = Url::parse("https://m0rtyn.cc").and_then(|origin| origin.join(path));
        ResourceRequest::get(url.expect("valid url"))
    }

    #[tokio::test]
    async fn no_controller_passes_through() {
        let registration = Registration::new();

        let outcome = registration
            .handle_fetch(get("/styles/main.css"))
            .await
            .expect("passthrough");

        assert!(matches!(outcome, FetchOutcome::Passthrough(_)));
    }

    #[tokio::test]
    async fn retired_controller_hands_over_to_its_successor() {
        let storage = Arc::new(MemoryStorage::new());
        let registration = Registration::new();
        let old = manager("v6", &storage);
        registration.register(old.clone()).await.expect("v6 registers");
        registration
            .register(manager("v7", &storage))
            .await
            .expect("v7 registers");
        assert_eq!(old.state(), WorkerState::Redundant);

        let outcome = registration
            .dispatch(old, get("/styles/main.css"))
            .await
            .expect("served by the new controller");

        let FetchOutcome::Served(served) = outcome else {
            panic!("expected a served response");
        };
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.body, bytes::Bytes::from("/styles/main.css new"));
    }
}
