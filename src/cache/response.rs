use axum::http::HeaderMap;
use bytes::Bytes;

/// Per-client state that must not be replayed from a shared bucket.
const PER_CLIENT_HEADERS: [&str; 2] = ["set-cookie", "set-cookie2"];

/// A fully buffered response, as stored in a bucket or returned by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Capture a header map, skipping values that are not visible ASCII.
    pub fn from_parts(status: u16, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Status in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// A 2xx response the origin has not marked `no-store` or `private`.
    pub fn is_storable(&self) -> bool {
        self.is_ok()
            && !self
                .headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("cache-control"))
                .flat_map(|(_, v)| v.split(','))
                .map(|directive| directive.split('=').next().unwrap_or("").trim())
                .any(|d| d.eq_ignore_ascii_case("no-store") || d.eq_ignore_ascii_case("private"))
    }

    /// Copy suitable for a bucket, with cookie headers removed.
    pub fn for_storage(&self) -> Self {
        Self {
            status: self.status,
            headers: self
                .headers
                .iter()
                .filter(|(k, _)| !PER_CLIENT_HEADERS.iter().any(|h| k.eq_ignore_ascii_case(h)))
                .cloned()
                .collect(),
            body: self.body.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, header::CONTENT_TYPE};

    use super::*;

    #[test]
    fn ok_is_the_2xx_range() {
        assert!(CachedResponse::new(200, "").is_ok());
        assert!(CachedResponse::new(204, "").is_ok());
        assert!(!CachedResponse::new(199, "").is_ok());
        assert!(!CachedResponse::new(304, "").is_ok());
        assert!(!CachedResponse::new(404, "").is_ok());
    }

    #[test]
    fn from_parts_keeps_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/css"));
        let response = CachedResponse::from_parts(200, &headers, Bytes::from("body{}"));

        assert_eq!(response.header("Content-Type"), Some("text/css"));
        assert_eq!(response.body, Bytes::from("body{}"));
    }

    #[test]
    fn storage_copy_drops_cookies() {
        let response = CachedResponse::new(200, "app")
            .with_header("content-type", "text/javascript")
            .with_header("Set-Cookie", "session=alice")
            .with_header("set-cookie2", "legacy=1");

        let stored = response.for_storage();

        assert_eq!(stored.header("set-cookie"), None);
        assert_eq!(stored.header("set-cookie2"), None);
        assert_eq!(stored.header("content-type"), Some("text/javascript"));
        assert_eq!(stored.body, response.body);
        assert_eq!(response.header("set-cookie"), Some("session=alice"));
    }

    #[test]
    fn no_store_and_private_are_not_storable() {
        let plain = CachedResponse::new(200, "");
        assert!(plain.is_storable());
        assert!(
            plain
                .clone()
                .with_header("cache-control", "max-age=60")
                .is_storable()
        );
        assert!(
            !plain
                .clone()
                .with_header("Cache-Control", "max-age=0, No-Store")
                .is_storable()
        );
        assert!(
            !plain
                .clone()
                .with_header("cache-control", "public")
                .with_header("cache-control", "private=\"x-user\"")
                .is_storable()
        );
        assert!(!CachedResponse::new(404, "").is_storable());
    }
}
