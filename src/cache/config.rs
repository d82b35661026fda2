//! Cache configuration.
//!
//! Identifies the current bucket (name prefix + version token), the origin the
//! manager serves, and the manifest pre-populated at install.

use thiserror::Error;
use url::Url;

use super::keys::ResourceRequest;

// Default values for cache configuration
pub const DEFAULT_NAME_PREFIX: &str = "m0rtyn-cc";
pub const DEFAULT_VERSION: &str = "v6";
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/styles/main.css",
    "/components/link-card/index.js",
    "/components/link-card/styles.css",
    "/components/link-card/template.html",
    "/components/site-logo/index.js",
    "/components/site-logo/styles.css",
    "/components/site-logo/template.html",
    "/assets/background-animation.js",
    "/assets/background-worker.js",
    "/assets/background-shared.js",
];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest entry `{path}` is not a valid path: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("manifest entry `{path}` resolves outside the origin")]
    CrossOrigin { path: String },
}

/// Deployment-time identity of a resource cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Stable prefix shared by every version's bucket.
    pub name_prefix: String,
    /// Version token; bumping it evicts older buckets on the next activation.
    pub version: String,
    /// The origin whose requests are eligible for caching.
    pub origin: Url,
    /// Ordered same-origin paths fetched at install.
    pub manifest: Vec<String>,
}

impl CacheConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            version: DEFAULT_VERSION.to_string(),
            origin,
            manifest: DEFAULT_MANIFEST.iter().map(|path| path.to_string()).collect(),
        }
    }

    /// Name of the bucket owned by this version.
    pub fn bucket_name(&self) -> String {
        format!("{}-{}", self.name_prefix, self.version)
    }

    /// Returns true if `url` shares this cache's origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Resolve a manifest path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }

    /// Build the GET requests for every manifest entry, in manifest order.
    pub fn manifest_requests(&self) -> Result<Vec<(String, ResourceRequest)>, ManifestError> {
        self.manifest
            .iter()
            .map(|path| {
                let url = self.resolve(path).map_err(|source| ManifestError::InvalidPath {
                    path: path.clone(),
                    source,
                })?;
                if !self.is_same_origin(&url) {
                    return Err(ManifestError::CrossOrigin { path: path.clone() });
                }
                Ok((path.clone(), ResourceRequest::get(url)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://m0rtyn.cc").expect("valid url")
    }

    #[test]
    fn default_bucket_name() {
        let config = CacheConfig::new(origin());
        assert_eq!(config.bucket_name(), "m0rtyn-cc-v6");
        assert_eq!(config.manifest.len(), 12);
        assert_eq!(config.manifest[0], "/");
    }

    #[test]
    fn bumping_version_changes_bucket() {
        let config = CacheConfig {
            version: "v7".to_string(),
            ..CacheConfig::new(origin())
        };
        assert_eq!(config.bucket_name(), "m0rtyn-cc-v7");
    }

    #[test]
    fn same_origin_ignores_path_and_query() {
        let config = CacheConfig::new(origin());
        let same = Url::parse("https://m0rtyn.cc/styles/main.css?x=1").expect("valid url");
        let other_scheme = Url::parse("http://m0rtyn.cc/").expect("valid url");
        let other_host = Url::parse("https://fonts.example.com/a.woff2").expect("valid url");

        assert!(config.is_same_origin(&same));
        assert!(!config.is_same_origin(&other_scheme));
        assert!(!config.is_same_origin(&other_host));
    }

    #[test]
    fn manifest_requests_keep_order() {
        let config = CacheConfig {
            manifest: vec!["/b.css".to_string(), "/a.js".to_string()],
            ..CacheConfig::new(origin())
        };
        let requests = config.manifest_requests().expect("resolvable manifest");
        let urls: Vec<&str> = requests.iter().map(|(_, r)| r.url.as_str()).collect();
        assert_eq!(urls, ["https://m0rtyn.cc/b.css", "https://m0rtyn.cc/a.js"]);
    }

    #[test]
    fn manifest_may_not_leave_the_origin() {
        let config = CacheConfig {
            manifest: vec!["/ok.css".to_string(), "//cdn.example.com/x.js".to_string()],
            ..CacheConfig::new(origin())
        };
        assert!(matches!(
            config.manifest_requests(),
            Err(ManifestError::CrossOrigin { path }) if path == "//cdn.example.com/x.js"
        ));
    }
}
