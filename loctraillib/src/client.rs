//! HTTP client for the shared cache store.

use std::time::Duration;

use reqwest::header;
use reqwest::StatusCode;

use crate::codec::{decode_json_limited, encode_entry};
use crate::config::StoreConfig;
use crate::error::{LoctrailError, ValidationError};
use crate::repo_url::cache_key;
use crate::stats::SharedCacheEntry;
use crate::validate::parse_entry;
use crate::Result;

/// Reads and writes entries on a store service at `base_url`.
#[derive(Debug, Clone)]
pub struct CacheClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    max_compressed_bytes: u64,
    max_decompressed_bytes: u64,
    max_days: usize,
}

impl CacheClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("loctrail/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let limits = StoreConfig::default();
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            max_compressed_bytes: limits.max_compressed_bytes,
            max_decompressed_bytes: limits.max_decompressed_bytes,
            max_days: limits.max_days,
        })
    }

    /// Builder: send a bearer token on writes
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, key: &str) -> String {
        format!("{}/cache/v1/{}", self.base_url, key)
    }

    /// The validated entry cached for `repo_url`, if any.
    pub async fn fetch(&self, repo_url: &str) -> Result<Option<SharedCacheEntry>> {
        let key = cache_key(repo_url)?;
        let response = self.http.get(self.url(&key)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(LoctrailError::Http(format!("cache read returned {}", status)))
            }
            _ => {}
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_compressed_bytes)
        {
            return Err(LoctrailError::PayloadTooLarge {
                limit: self.max_compressed_bytes,
            });
        }

        let body = response.bytes().await?;
        let entry = parse_entry(
            decode_json_limited(&body, self.max_decompressed_bytes)?,
            self.max_days,
        )?;
        if cache_key(&entry.repo_url)? != key {
            return Err(ValidationError::new("repoUrl", "does not match the requested repository").into());
        }

        tracing::debug!(repo = repo_url, head = %entry.head_commit, "fetched cached entry");
        Ok(Some(entry))
    }

    /// Upload an entry, replacing whatever is stored for its repository.
    pub async fn push(&self, entry: &SharedCacheEntry) -> Result<()> {
        let key = cache_key(&entry.repo_url)?;
        let body = encode_entry(entry)?;

        let mut request = self
            .http
            .put(self.url(&key))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(LoctrailError::Http(format!(
                "cache write returned {}: {}",
                status,
                reason.trim()
            )));
        }

        tracing::info!(repo = %entry.repo_url, head = %entry.head_commit, "pushed cache entry");
        Ok(())
    }
}
