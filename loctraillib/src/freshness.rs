//! Freshness verification of claimed head commits.
//!
//! A claimed head is accepted only if the repository's own reference
//! advertisement (`info/refs?service=git-upload-pack`) lists it. Timeouts,
//! transport errors and unexpected statuses all fail closed.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LoctrailError;
use crate::repo_url::RepoCoordinates;
use crate::Result;

/// Upper bound on an advertisement body.
const MAX_ADVERTISEMENT_BYTES: usize = 32 * 1024 * 1024;

/// Confirms that a commit id is live in a repository.
#[async_trait]
pub trait HeadVerifier: Send + Sync {
    /// `Ok(())` when `head` is currently advertised by `repo`.
    async fn verify(&self, repo: &RepoCoordinates, head: &str) -> Result<()>;
}

/// Queries the smart-HTTP reference discovery endpoint.
pub struct RefDiscoveryVerifier {
    client: reqwest::Client,
    upstream_proxy: Option<String>,
    max_body: usize,
}

impl RefDiscoveryVerifier {
    /// A verifier whose queries give up after `timeout`.
    ///
    /// With `upstream_proxy`, requests go to `{proxy}/{host}/{owner}/{repo}.git/...`
    /// instead of the host itself.
    pub fn new(timeout: Duration, upstream_proxy: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("git/loctrail-", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            upstream_proxy: upstream_proxy.map(|p| p.trim_end_matches('/').to_string()),
            max_body: MAX_ADVERTISEMENT_BYTES,
        })
    }

    /// Caps the advertisement body at `bytes` instead of the default.
    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    /// URL of the reference advertisement for `repo`.
    pub fn discovery_url(&self, repo: &RepoCoordinates) -> String {
        let path = format!(
            "{}/{}/{}.git/info/refs?service=git-upload-pack",
            repo.host, repo.owner, repo.repo
        );
        match &self.upstream_proxy {
            Some(proxy) => format!("{}/{}", proxy, path),
            None => format!("https://{}", path),
        }
    }
}

#[async_trait]
impl HeadVerifier for RefDiscoveryVerifier {
    async fn verify(&self, repo: &RepoCoordinates, head: &str) -> Result<()> {
        let url = self.discovery_url(repo);
        let mut response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LoctrailError::Freshness("reference discovery timed out".to_string())
            } else {
                LoctrailError::Freshness(format!("reference discovery failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoctrailError::Freshness(format!(
                "reference discovery returned {}",
                status
            )));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body as u64)
        {
            return Err(too_large());
        }

        // Chunked bodies carry no length up front
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| LoctrailError::Freshness(format!("reading advertisement: {}", e)))?
        {
            if body.len() + chunk.len() > self.max_body {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        let advertised = parse_advertised_ids(&body)?;

        if advertised.contains(head) {
            tracing::debug!(repo = %repo.normalized(), head, "head commit confirmed upstream");
            Ok(())
        } else {
            Err(LoctrailError::Freshness(format!(
                "head commit {} is not advertised by {}",
                head,
                repo.normalized()
            )))
        }
    }
}

fn too_large() -> LoctrailError {
    LoctrailError::Freshness("reference advertisement too large".to_string())
}

/// Accepts exactly a fixed set of heads; for offline deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct KnownHeads {
    heads: HashSet<String>,
}

impl KnownHeads {
    pub fn new<I, S>(heads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            heads: heads.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl HeadVerifier for KnownHeads {
    async fn verify(&self, _repo: &RepoCoordinates, head: &str) -> Result<()> {
        if self.heads.contains(head) {
            Ok(())
        } else {
            Err(LoctrailError::Freshness(format!("unknown head commit {}", head)))
        }
    }
}

/// Commit ids listed in a pkt-line reference advertisement.
pub fn parse_advertised_ids(body: &[u8]) -> Result<HashSet<String>> {
    let malformed = |what: &str| LoctrailError::Freshness(format!("malformed advertisement: {}", what));

    let mut ids = HashSet::new();
    let mut rest = body;
    while !rest.is_empty() {
        let header = rest.get(..4).ok_or_else(|| malformed("truncated length"))?;
        let len = std::str::from_utf8(header)
            .ok()
            .and_then(|h| usize::from_str_radix(h, 16).ok())
            .ok_or_else(|| malformed("bad length"))?;

        // Flush, delimiter and response-end packets carry no payload
        if len < 4 {
            rest = &rest[4..];
            continue;
        }
        let line = rest.get(4..len).ok_or_else(|| malformed("truncated line"))?;
        rest = &rest[len..];

        if line.starts_with(b"#") {
            continue;
        }
        if let Some(id) = line.get(..40).and_then(|id| std::str::from_utf8(id).ok()) {
            if id.bytes().all(|b| b.is_ascii_hexdigit()) {
                ids.insert(id.to_ascii_lowercase());
            }
        }
    }

    Ok(ids)
}
