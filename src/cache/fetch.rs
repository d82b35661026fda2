use async_trait::async_trait;
use thiserror::Error;

use super::{keys::ResourceRequest, response::CachedResponse};

/// A request that produced no response at all.
///
/// Non-2xx statuses are responses, not errors.
#[derive(Debug, Clone, Error)]
#[error("network request for {url} failed: {message}")]
pub struct FetchError {
    pub url: String,
    pub message: String,
}

impl FetchError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// The network side of the cache.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, request: &ResourceRequest) -> Result<CachedResponse, FetchError>;
}
