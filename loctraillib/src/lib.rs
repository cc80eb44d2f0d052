//! # loctraillib
//!
//! Day-by-day lines-of-code history for a git branch, split by language and by
//! production vs test code, with a verified shared cache so one computed
//! history can be reused and extended by other callers.
//!
//! ## Overview
//!
//! - **Incremental analysis**: the first commit is scanned in full; every later
//!   commit is a lock-step tree diff that skips unchanged subtrees, so work
//!   follows the number of changed paths, not the size of the repository.
//! - **Classification**: paths map to a language and a production/test label
//!   by skip lists, test directories and per-language test filename
//!   conventions. Rust files are additionally split by a brace-depth scan that
//!   finds inline `#[cfg(test)]` and `#[test]` blocks.
//! - **Day buckets**: one snapshot per calendar day, with days without commits
//!   carried forward.
//! - **Shared cache**: gzip JSON entries addressed by the hash of the normalized
//!   repository URL, validated and checked against the live repository's
//!   advertised refs before they are stored.
//!
//! ## Origins
//!
//! The inline-test scanner follows the parsing approach of
//! [cargo-warloc](https://github.com/Maximkaaa/cargo-warloc) by Maxim Gritsenko
//! (MIT licensed).
//!
//! ## Example
//!
//! ```rust
//! use loctraillib::{classify_path, count_lines, repo_url, Language};
//!
//! let class = classify_path("src/lib.rs").unwrap();
//! assert_eq!(class.language, Language::Rust);
//!
//! let counts = count_lines(class, "pub fn one() -> u8 {\n    1\n}\n\n#[test]\nfn t() {}\n");
//! assert_eq!((counts.lines, counts.test_lines), (5, 2));
//!
//! // Lockfiles never count
//! assert!(classify_path("Cargo.lock").is_none());
//!
//! let key = repo_url::cache_key("git@github.com:rust-lang/cargo.git").unwrap();
//! assert_eq!(key, repo_url::cache_key("https://github.com/rust-lang/cargo").unwrap());
//! assert_eq!(repo_url::object_path(&key), format!("results/v1/{}.json.gz", key));
//! ```

pub mod analyzer;
pub mod blobs;
pub mod buckets;
pub mod classify;
pub mod client;
pub mod codec;
pub mod config;
pub mod diff;
pub mod error;
pub mod filter;
pub mod freshness;
pub mod language;
pub mod progress;
pub mod ratelimit;
pub mod repo_url;
pub mod server;
pub mod source;
pub mod stats;
pub mod store;
pub mod validate;
pub mod visitor;

pub use analyzer::{analyze, plan_resume, spawn_analysis, AnalysisHandle, ResumePlan};
pub use blobs::{BlobPool, FetchStats};
pub use buckets::{CommitSnapshot, DayBuckets};
pub use classify::{classify_path, count_lines, FileClass, LineCounts};
pub use client::CacheClient;
pub use config::{AnalysisOptions, StoreConfig};
pub use diff::{diff_trees, FileChange, FileChangeType, IncrementalContext};
pub use error::{LoctrailError, ValidationError};
pub use filter::FilterConfig;
pub use freshness::{HeadVerifier, KnownHeads, RefDiscoveryVerifier};
pub use language::Language;
pub use progress::{ProgressEvent, ProgressSink};
pub use ratelimit::RateLimiter;
pub use repo_url::RepoCoordinates;
pub use server::{router, serve, ApiError, AppState};
pub use source::{CommitInfo, GitSource, ObjectId, ObjectSource};
pub use stats::{
    AnalysisResult, DayStats, FileState, LanguageCounts, SharedCacheEntry, Snapshot,
    CACHE_ENTRY_VERSION, CARRY_FORWARD_COMMENT,
};
pub use store::{CacheStore, EdgeCache, FsObjectStore, MemoryObjectStore, ObjectStore};
pub use validate::{parse_entry, validate_entry, validate_result};
pub use visitor::{split_rust_source, LineSplit};

/// Result type for loctraillib operations
pub type Result<T> = std::result::Result<T, LoctrailError>;
