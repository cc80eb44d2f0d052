//! Content-addressed object storage for cache entries.
//!
//! Objects are whole gzip payloads addressed by `results/v1/{key}.json.gz`.
//! A write replaces the object in full; the last write wins. Reads go through
//! a short-lived in-process [`EdgeCache`] that a write to the same key clears.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::LoctrailError;
use crate::repo_url::object_path;
use crate::Result;

/// Whole-object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// The object at `path`, or `None` if absent.
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Replace the object at `path`.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;
}

/// Objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(LoctrailError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid object path {:?}", path),
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers never observe a partially written object
        let temp = file.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &data).await?;
        if let Err(e) = tokio::fs::rename(&temp, &file).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Objects in process memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.lock().get(path).cloned())
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.objects.lock().insert(path.to_string(), data);
        Ok(())
    }
}

/// Short-lived read cache in front of an object store.
#[derive(Debug)]
pub struct EdgeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, Bytes)>>,
}

impl EdgeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored, data)) if now.duration_since(*stored) < self.ttl => Some(data.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, data: Bytes) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries
            .lock()
            .insert(key.to_string(), (Instant::now(), data));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// The shared cache store: key-addressed reads and writes over an [`ObjectStore`].
pub struct CacheStore {
    objects: Arc<dyn ObjectStore>,
    edge: EdgeCache,
}

impl CacheStore {
    pub fn new(objects: Arc<dyn ObjectStore>, edge_ttl: Duration) -> Self {
        Self {
            objects,
            edge: EdgeCache::new(edge_ttl),
        }
    }

    /// The compressed entry stored under `key`.
    pub async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(hit) = self.edge.get(key) {
            tracing::debug!(key, "edge cache hit");
            return Ok(Some(hit));
        }
        let found = self.objects.get(&object_path(key)).await?;
        if let Some(data) = &found {
            self.edge.insert(key, data.clone());
        }
        Ok(found)
    }

    /// Replace the compressed entry stored under `key`.
    pub async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.put(&object_path(key), data).await?;
        self.edge.invalidate(key);
        Ok(())
    }
}
