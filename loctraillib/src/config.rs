//! Typed configuration for analysis runs and for the store service.

use std::time::Duration;

use crate::blobs::DEFAULT_FETCH_CONCURRENCY;
use crate::filter::FilterConfig;
use crate::stats::AnalysisResult;

/// Default byte budget of the per-run blob content cache.
pub const DEFAULT_BLOB_CACHE_BYTES: usize = 256 * 1024 * 1024;

/// Options for one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Repository identity recorded in the result; falls back to the source's remote
    pub repo_url: Option<String>,
    /// Revision to walk (defaults to `HEAD`)
    pub branch: Option<String>,
    /// Maximum concurrent blob reads
    pub fetch_concurrency: usize,
    /// Byte budget of the blob content cache
    pub blob_cache_bytes: usize,
    /// Path filter applied before classification
    pub filter: FilterConfig,
    /// Prior result to extend instead of starting cold
    pub resume_from: Option<AnalysisResult>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            repo_url: None,
            branch: None,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            blob_cache_bytes: DEFAULT_BLOB_CACHE_BYTES,
            filter: FilterConfig::default(),
            resume_from: None,
        }
    }
}

impl AnalysisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the repository URL
    pub fn repo_url(mut self, url: impl Into<String>) -> Self {
        self.repo_url = Some(url.into());
        self
    }

    /// Builder: set the revision to walk
    pub fn branch(mut self, rev: impl Into<String>) -> Self {
        self.branch = Some(rev.into());
        self
    }

    /// Builder: set the fetch concurrency
    pub fn fetch_concurrency(mut self, n: usize) -> Self {
        self.fetch_concurrency = n.max(1);
        self
    }

    /// Builder: set the blob cache budget
    pub fn blob_cache_bytes(mut self, bytes: usize) -> Self {
        self.blob_cache_bytes = bytes;
        self
    }

    /// Builder: set the path filter
    pub fn filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    /// Builder: resume from a prior result
    pub fn resume_from(mut self, prior: AnalysisResult) -> Self {
        self.resume_from = Some(prior);
        self
    }

    /// The revision to walk.
    pub fn rev(&self) -> &str {
        self.branch.as_deref().unwrap_or("HEAD")
    }
}

/// Settings of the shared cache store service.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Ceiling on a write's compressed body
    pub max_compressed_bytes: u64,
    /// Ceiling on a write's decompressed body
    pub max_decompressed_bytes: u64,
    /// Maximum number of days in an entry
    pub max_days: usize,
    /// Lifetime of an entry in the in-process edge cache
    pub edge_ttl: Duration,
    /// `max-age` advertised on reads
    pub cache_max_age: Duration,
    /// Bearer token required on writes, if any
    pub write_token: Option<String>,
    /// Writes allowed per origin per window
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// Take the origin from the first `X-Forwarded-For` hop
    pub trust_forwarded_for: bool,
    /// Deadline of the reference-discovery query
    pub freshness_timeout: Duration,
    /// Base URL of the forwarding layer in front of upstream hosts
    pub upstream_proxy: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_compressed_bytes: 20 * 1024 * 1024,
            max_decompressed_bytes: 64 * 1024 * 1024,
            max_days: 20_000,
            edge_ttl: Duration::from_secs(60),
            cache_max_age: Duration::from_secs(300),
            write_token: None,
            rate_limit: 10,
            rate_window: Duration::from_secs(60),
            trust_forwarded_for: false,
            freshness_timeout: Duration::from_secs(5),
            upstream_proxy: None,
        }
    }
}
