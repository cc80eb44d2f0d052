//! Repository URL normalization and cache addressing.
//!
//! Every accepted spelling of a repository (`https://github.com/Owner/Repo.git`,
//! `git@github.com:owner/repo`, `github.com/owner/repo/`) normalizes to one
//! canonical `https://{host}/{owner}/{repo}` form in lowercase. The cache key is
//! the SHA-256 hex digest of that form.

use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Hosts whose repositories may be analyzed and cached.
pub const ALLOWED_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org", "codeberg.org"];

/// Length of a cache key (hex SHA-256).
pub const CACHE_KEY_LEN: usize = 64;

/// Host, owner and repository name of an allowed repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoCoordinates {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoCoordinates {
    /// Parse any accepted spelling of a repository URL.
    pub fn parse(url: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::new("repoUrl", format!("{}: {:?}", reason, url));

        let trimmed = url.trim();
        let rest = if let Some(scp) = trimmed.strip_prefix("git@") {
            // scp-like `git@host:owner/repo`
            scp.replacen(':', "/", 1)
        } else {
            let without_scheme = ["https://", "http://", "ssh://", "git://"]
                .iter()
                .find_map(|scheme| trimmed.strip_prefix(scheme))
                .unwrap_or(trimmed);
            without_scheme
                .strip_prefix("git@")
                .unwrap_or(without_scheme)
                .to_string()
        };

        let lower = rest.to_ascii_lowercase();
        let mut parts = lower.trim_end_matches('/').split('/');
        let host = parts.next().unwrap_or("");
        let owner = parts.next().unwrap_or("");
        let repo = parts.next().unwrap_or("");
        if parts.next().is_some() {
            return Err(invalid("expected host/owner/repo"));
        }

        if !ALLOWED_HOSTS.contains(&host) {
            return Err(invalid("host not allowed"));
        }
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if !is_valid_segment(owner) || !is_valid_segment(repo) {
            return Err(invalid("malformed owner or repository name"));
        }

        Ok(Self {
            host: host.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Canonical `https://{host}/{owner}/{repo}` form.
    pub fn normalized(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.repo)
    }

    /// Cache key of this repository.
    pub fn cache_key(&self) -> String {
        hex::encode(Sha256::digest(self.normalized().as_bytes()))
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 100
        && !segment.starts_with('.')
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Canonical form of a repository URL.
pub fn normalize(url: &str) -> Result<String, ValidationError> {
    RepoCoordinates::parse(url).map(|c| c.normalized())
}

/// Cache key of a repository URL.
pub fn cache_key(url: &str) -> Result<String, ValidationError> {
    RepoCoordinates::parse(url).map(|c| c.cache_key())
}

/// Object store address of a cache key.
pub fn object_path(key: &str) -> String {
    format!("results/v1/{}.json.gz", key)
}

/// Whether `key` has the shape of a cache key (64 lowercase hex digits).
pub fn is_valid_cache_key(key: &str) -> bool {
    key.len() == CACHE_KEY_LEN && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Whether two URLs name the same repository.
pub fn same_repository(a: &str, b: &str) -> bool {
    match (normalize(a), normalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spellings_normalize_alike() {
        let expected = "https://github.com/rust-lang/cargo";
        for url in [
            "https://github.com/rust-lang/cargo",
            "https://github.com/Rust-Lang/Cargo.git",
            "http://github.com/rust-lang/cargo/",
            "git@github.com:rust-lang/cargo.git",
            "ssh://git@github.com/rust-lang/cargo",
            "github.com/rust-lang/cargo",
        ] {
            assert_eq!(normalize(url).unwrap(), expected, "{}", url);
        }
    }

    #[test]
    fn test_rejects_disallowed_shapes() {
        assert!(normalize("https://example.com/o/r").is_err());
        assert!(normalize("https://github.com/o").is_err());
        assert!(normalize("https://github.com/o/r/tree/main").is_err());
        assert!(normalize("https://github.com/../r").is_err());
        assert!(normalize("https://github.com/o/r?x=1").is_err());
        let err = normalize("ftp://nowhere").unwrap_err();
        assert_eq!(err.field, "repoUrl");
    }

    #[test]
    fn test_cache_key_is_stable_hex() {
        let a = cache_key("https://github.com/o/r").unwrap();
        let b = cache_key("git@github.com:O/R.git").unwrap();
        assert_eq!(a, b);
        assert!(is_valid_cache_key(&a));
        assert_ne!(a, cache_key("https://gitlab.com/o/r").unwrap());
        assert_eq!(object_path(&a), format!("results/v1/{}.json.gz", a));
    }

    #[test]
    fn test_cache_key_syntax() {
        assert!(is_valid_cache_key(&"a".repeat(64)));
        assert!(!is_valid_cache_key(&"A".repeat(64)));
        assert!(!is_valid_cache_key(&"a".repeat(63)));
        assert!(!is_valid_cache_key("../../etc/passwd"));
    }

    #[test]
    fn test_same_repository() {
        assert!(same_repository("https://github.com/o/r.git", "github.com/O/r"));
        assert!(!same_repository("https://github.com/o/r", "https://github.com/o/s"));
        assert!(same_repository("/local/path", "/local/path"));
    }
}
