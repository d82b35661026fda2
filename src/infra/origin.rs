//! Network access to the origin.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use reqwest::{Client, redirect::Policy};
use tracing::trace;

use crate::cache::{CachedResponse, FetchError, Fetcher, ResourceRequest};

use super::error::InfraError;

/// Headers that describe one connection rather than the resource.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Drop hop-by-hop headers plus `host` and `content-length`, which the
/// outgoing side recomputes.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name == header::HOST || name == header::CONTENT_LENGTH {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// `Fetcher` over HTTP. No timeout and no retries: a single failed request is
/// a single failure. Redirects are handed back to the caller unfollowed.
#[derive(Clone, Debug)]
pub struct OriginFetcher {
    client: Client,
}

impl OriginFetcher {
    pub fn new(user_agent: &str) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(Policy::none())
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn default_user_agent() -> &'static str {
        concat!("precache/", env!("CARGO_PKG_VERSION"))
    }
}

#[async_trait]
impl Fetcher for OriginFetcher {
    async fn fetch(&self, request: &ResourceRequest) -> Result<CachedResponse, FetchError> {
        let url = request.url.as_str();
        trace!(method = %request.method, url, "fetching from origin");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(forwardable_headers(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(|err| FetchError::new(url, err.to_string()))?;

        let status = response.status().as_u16();
        let headers = forwardable_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::new(url, format!("failed to read body: {err}")))?;

        Ok(CachedResponse::from_parts(status, &headers, body))
    }
}
