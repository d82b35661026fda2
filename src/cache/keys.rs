//! Request identity and classification.
//!
//! Defines `ResourceRequest` for intercepted requests, `RequestKey` for bucket
//! entries, and `RequestClass` which selects the serving strategy.

use std::fmt;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

/// An intercepted request, fully resolved against its origin.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResourceRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn class(&self) -> RequestClass {
        RequestClass::of_path(self.url.path())
    }
}

/// Identity of a bucket entry: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn from_request(request: &ResourceRequest) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.as_str().to_string(),
            url: url.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Strategy selector for eligible requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// The root document or any `.html` path; served stale-while-revalidate.
    Navigation,
    /// Everything else; served cache-first.
    Asset,
}

impl RequestClass {
    pub fn of_path(path: &str) -> Self {
        if path == "/" || path.ends_with(".html") {
            Self::Navigation
        } else {
            Self::Asset
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Asset => "asset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> ResourceRequest {
        ResourceRequest::get(Url::parse(url).expect("valid url"))
    }

    #[test]
    fn root_and_html_are_navigation() {
        assert_eq!(RequestClass::of_path("/"), RequestClass::Navigation);
        assert_eq!(RequestClass::of_path("/index.html"), RequestClass::Navigation);
        assert_eq!(
            RequestClass::of_path("/components/link-card/template.html"),
            RequestClass::Navigation
        );
    }

    #[test]
    fn everything_else_is_asset() {
        assert_eq!(RequestClass::of_path("/styles/main.css"), RequestClass::Asset);
        assert_eq!(RequestClass::of_path("/about"), RequestClass::Asset);
        assert_eq!(RequestClass::of_path("/about/"), RequestClass::Asset);
        assert_eq!(RequestClass::of_path("/page.htm"), RequestClass::Asset);
        assert_eq!(RequestClass::of_path("/index.HTML"), RequestClass::Asset);
    }

    #[test]
    fn classification_ignores_query() {
        assert_eq!(
            request("https://m0rtyn.cc/?utm=feed").class(),
            RequestClass::Navigation
        );
        assert_eq!(
            request("https://m0rtyn.cc/app.js?v=.html").class(),
            RequestClass::Asset
        );
    }

    #[test]
    fn key_drops_fragment_but_keeps_query() {
        let a = RequestKey::from_request(&request("https://m0rtyn.cc/index.html#top"));
        let b = RequestKey::from_request(&request("https://m0rtyn.cc/index.html"));
        let c = RequestKey::from_request(&request("https://m0rtyn.cc/index.html?x=1"));

        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_eq!(b.to_string(), "GET https://m0rtyn.cc/index.html");
    }
}
