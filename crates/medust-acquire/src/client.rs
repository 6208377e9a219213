//! HTTP client for the geospatial service with a local response cache.
//!
//! Responses are written to disk under the cache directory, keyed by product,
//! region, date range and variable (see [`ProductQuery::cache_path`]). A query
//! whose response is already cached is served from disk without a request.
//!
//! ## Thread Safety
//!
//! `ServiceClient` is `Sync`: regions are fetched concurrently from a shared
//! client. Download statistics are kept in atomics.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::{AcquireError, ProductQuery, Result, ServiceResponse};

/// Download statistics for the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Responses downloaded this session.
    pub responses_downloaded: usize,
    /// Responses served from the cache this session.
    pub cache_hits: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
}

/// Client for the acquisition service.
pub struct ServiceClient {
    /// Query endpoint.
    base_url: String,
    /// Cache directory for responses.
    cache_dir: PathBuf,
    /// HTTP client.
    client: reqwest::blocking::Client,
    /// Responses downloaded this session.
    responses_downloaded: AtomicUsize,
    /// Responses served from cache this session.
    cache_hits: AtomicUsize,
    /// Bytes downloaded this session.
    bytes_downloaded: AtomicU64,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("base_url", &self.base_url)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

impl ServiceClient {
    /// Create a client, creating the cache directory if needed.
    pub fn new<P: AsRef<Path>>(base_url: &str, cache_dir: P, timeout: Duration) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_dir,
            client,
            responses_downloaded: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
        })
    }

    /// The query endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Download statistics for this session.
    pub fn download_stats(&self) -> DownloadStats {
        DownloadStats {
            responses_downloaded: self.responses_downloaded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }

    /// Whether a query's response is cached.
    pub fn is_cached(&self, query: &ProductQuery) -> bool {
        query.cache_path(&self.cache_dir).exists()
    }

    /// Fetch and decode a query's response, using the cache if available.
    pub fn fetch(&self, query: &ProductQuery) -> Result<ServiceResponse> {
        let cache_path = query.cache_path(&self.cache_dir);

        if cache_path.exists() {
            debug!("Cache hit for {} ({})", query, cache_path.display());
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            let body = fs::read_to_string(&cache_path)?;
            return ServiceResponse::from_json(&body);
        }

        let body = self.download(query)?;
        // Decode before caching so a malformed body is never cached.
        let response = ServiceResponse::from_json(&body)?;
        self.write_cache(&cache_path, body.as_bytes())?;
        Ok(response)
    }

    fn download(&self, query: &ProductQuery) -> Result<String> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&query.params())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::ServiceStatus {
                product: query.product.id().to_string(),
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let body = response.text()?;
        self.responses_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        info!("Downloaded {} ({} bytes)", query, body.len());
        Ok(body)
    }

    fn write_cache(&self, cache_path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write to a sibling temp file first so readers never see partial JSON.
        let tmp = cache_path.with_extension("json.part");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, cache_path)?;
        Ok(())
    }
}
