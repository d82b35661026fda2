//! Versioned resource cache.
//!
//! Each deployment version owns one bucket named `{prefix}-{version}`:
//!
//! - **install** pre-populates the bucket from a fixed manifest, all or nothing
//! - **activate** evicts every other version's bucket
//! - **handle_fetch** serves same-origin GETs stale-while-revalidate
//!   (navigations) or cache-first (assets)
//!
//! Storage and network sit behind the `CacheStorage` and `Fetcher` traits.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! name_prefix = "m0rtyn-cc"
//! version = "v6"
//! manifest = ["/", "/index.html", "/styles/main.css"]
//! storage = "disk"
//! directory = "cache"
//! ```

mod config;
mod fetch;
mod keys;
mod lifecycle;
mod lock;
mod manager;
mod registration;
mod response;
mod storage;

pub use config::{CacheConfig, DEFAULT_MANIFEST, DEFAULT_NAME_PREFIX, DEFAULT_VERSION, ManifestError};
pub use fetch::{FetchError, Fetcher};
pub use keys::{RequestClass, RequestKey, ResourceRequest};
pub use lifecycle::WorkerState;
pub use manager::{
    ActivationReport, BackgroundTask, FetchOutcome, InstallError, InstallReport, ManagerError,
    ResourceCacheManager, ResponseSource, Served,
};
pub use registration::{Registration, UpgradeReport};
pub use response::CachedResponse;
pub use storage::{CacheStorage, DiskStorage, MemoryStorage, StorageError, validate_bucket_name};
