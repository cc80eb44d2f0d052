//! Bounded-concurrency blob retrieval with a run-wide content cache.
//!
//! Reads run on a dedicated rayon pool sized to the fetch concurrency, so at
//! most that many reads are ever in flight; a larger batch queues on the pool
//! instead of failing. Contents are cached by content id for the whole run, so
//! a blob that comes back later (a revert, a file moved back) is never read
//! twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::LoctrailError;
use crate::source::{ObjectId, ObjectSource};
use crate::Result;

/// Default number of concurrent blob reads.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// A NUL byte within this many leading bytes marks a blob as binary.
pub const BINARY_SNIFF_BYTES: usize = 8000;

/// Counters for one run, reported at the end of an analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Distinct ids requested
    pub requested: u64,
    /// Served from the run cache
    pub cache_hits: u64,
    /// Read from the source
    pub fetched: u64,
    /// Omitted as binary
    pub binary: u64,
    /// Omitted because the source could not provide them
    pub unavailable: u64,
}

/// Whether content looks binary.
pub fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

/// The blob fetch pool of one analysis run.
pub struct BlobPool {
    pool: rayon::ThreadPool,
    /// `None` caches a negative result (binary or unavailable)
    cache: HashMap<ObjectId, Option<Arc<str>>>,
    cached_bytes: usize,
    cache_budget: usize,
    stats: FetchStats,
}

impl BlobPool {
    /// Create a pool with `concurrency` workers and a content cache capped at `cache_budget` bytes.
    pub fn new(concurrency: usize, cache_budget: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("loctrail-fetch-{}", i))
            .build()
            .map_err(|e| LoctrailError::Worker(format!("failed to start fetch pool: {}", e)))?;
        Ok(Self {
            pool,
            cache: HashMap::new(),
            cached_bytes: 0,
            cache_budget,
            stats: FetchStats::default(),
        })
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    /// Fetch a batch of blobs.
    ///
    /// The returned map omits ids whose content is binary or unavailable;
    /// neither case is an error.
    pub fn fetch<S: ObjectSource + ?Sized>(
        &mut self,
        source: &S,
        ids: &[ObjectId],
    ) -> HashMap<ObjectId, Arc<str>> {
        let mut seen = HashSet::new();
        let mut found = HashMap::new();
        let mut misses = Vec::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            self.stats.requested += 1;
            match self.cache.get(&id) {
                Some(hit) => {
                    self.stats.cache_hits += 1;
                    if let Some(content) = hit {
                        found.insert(id, Arc::clone(content));
                    }
                }
                None => misses.push(id),
            }
        }

        if misses.is_empty() {
            return found;
        }
        tracing::debug!(
            misses = misses.len(),
            hits = found.len(),
            "fetching blob batch"
        );

        let fetched: Vec<(ObjectId, Result<Option<Vec<u8>>>)> = self.pool.install(|| {
            misses
                .par_iter()
                .map(|&id| (id, source.read_blob(id)))
                .collect()
        });

        for (id, outcome) in fetched {
            self.stats.fetched += 1;
            let content = match outcome {
                Ok(Some(bytes)) if is_binary(&bytes) => {
                    self.stats.binary += 1;
                    None
                }
                Ok(Some(bytes)) => Some(Arc::<str>::from(String::from_utf8_lossy(&bytes))),
                Ok(None) => {
                    self.stats.unavailable += 1;
                    None
                }
                Err(e) => {
                    tracing::warn!(blob = %id, error = %e, "blob read failed, excluding");
                    self.stats.unavailable += 1;
                    None
                }
            };
            self.remember(id, content.clone());
            if let Some(content) = content {
                found.insert(id, content);
            }
        }

        found
    }

    fn remember(&mut self, id: ObjectId, content: Option<Arc<str>>) {
        let size = content.as_ref().map_or(0, |c| c.len());
        if self.cached_bytes + size > self.cache_budget {
            return;
        }
        self.cached_bytes += size;
        self.cache.insert(id, content);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::source::testing::MemorySource;
    use crate::source::{CommitInfo, TreeEntry};

    #[test]
    fn test_is_binary() {
        assert!(!is_binary(b"fn main() {}\n"));
        assert!(is_binary(b"\x89PNG\r\n\x1a\n\0\0\0"));
        let mut late_nul = vec![b'a'; BINARY_SNIFF_BYTES + 10];
        late_nul[BINARY_SNIFF_BYTES + 5] = 0;
        assert!(!is_binary(&late_nul));
    }

    #[test]
    fn test_fetch_omits_binary() {
        let mut source = MemorySource::new();
        let text = source.blob("hello\n");
        let binary = source.blob("bin\0ary");
        let mut pool = BlobPool::new(2, 1 << 20).unwrap();

        let found = pool.fetch(&source, &[text, binary]);
        assert_eq!(found.len(), 1);
        assert_eq!(&*found[&text], "hello\n");
        assert_eq!(pool.stats().binary, 1);
    }

    #[test]
    fn test_cache_prevents_refetch() {
        let mut source = MemorySource::new();
        let a = source.blob("a\n");
        let b = source.blob("b\0");
        let mut pool = BlobPool::new(2, 1 << 20).unwrap();

        pool.fetch(&source, &[a, b, a]);
        assert_eq!(source.blob_reads.lock().len(), 2);

        let again = pool.fetch(&source, &[a, b]);
        assert_eq!(source.blob_reads.lock().len(), 2, "no second read");
        assert!(again.contains_key(&a));
        assert!(!again.contains_key(&b), "negative results are cached too");
        assert_eq!(pool.stats().cache_hits, 2);
    }

    #[test]
    fn test_cache_budget_is_respected() {
        let mut source = MemorySource::new();
        let big = source.blob(&"x".repeat(100));
        let mut pool = BlobPool::new(1, 10).unwrap();

        pool.fetch(&source, &[big]);
        pool.fetch(&source, &[big]);
        assert_eq!(source.blob_reads.lock().len(), 2, "over-budget content is not cached");
    }

    /// Tracks the highest number of concurrent reads.
    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ObjectSource for SlowSource {
        fn history(&self, _rev: &str) -> Result<Vec<CommitInfo>> {
            Ok(Vec::new())
        }

        fn tree_entries(&self, _tree: ObjectId) -> Result<Vec<TreeEntry>> {
            Ok(Vec::new())
        }

        fn read_blob(&self, _id: ObjectId) -> Result<Option<Vec<u8>>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(b"x\n".to_vec()))
        }
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let source = SlowSource {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let ids: Vec<ObjectId> = (1..=40)
            .map(|n| ObjectId::from_hex(format!("{:040x}", n).as_bytes()).unwrap())
            .collect();
        let mut pool = BlobPool::new(3, 1 << 20).unwrap();

        let found = pool.fetch(&source, &ids);
        assert_eq!(found.len(), 40, "excess requests queue rather than fail");
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
    }
}
