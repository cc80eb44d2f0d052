//! Access to commits, trees and blobs.
//!
//! The analyzer only ever talks to an [`ObjectSource`]. [`GitSource`] backs it
//! with a local repository through `gix`; tests use an in-memory source that
//! records every read.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::error::LoctrailError;
use crate::Result;

pub use gix::ObjectId;

/// Kind of a tree entry, as far as counting cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodules and symlinks; never walked or counted
    Other,
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
    pub id: ObjectId,
}

/// The commit metadata the analyzer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: ObjectId,
    pub tree: ObjectId,
    /// Author date, in the author's own timezone
    pub date: NaiveDate,
    /// First line of the commit message
    pub message: String,
}

/// Read access to a repository's object graph.
///
/// Implementations must be shareable across the blob fetch workers.
pub trait ObjectSource: Send + Sync {
    /// First-parent history of `rev`, oldest first, ending at `rev` itself.
    fn history(&self, rev: &str) -> Result<Vec<CommitInfo>>;

    /// Entries of a tree object.
    fn tree_entries(&self, tree: ObjectId) -> Result<Vec<TreeEntry>>;

    /// Content of a blob, or `None` if it is unavailable.
    fn read_blob(&self, id: ObjectId) -> Result<Option<Vec<u8>>>;

    /// Short name of the branch `HEAD` points to.
    fn default_branch(&self) -> Option<String> {
        None
    }

    /// Fetch URL of the default remote.
    fn remote_url(&self) -> Option<String> {
        None
    }
}

impl<T: ObjectSource + ?Sized> ObjectSource for Arc<T> {
    fn history(&self, rev: &str) -> Result<Vec<CommitInfo>> {
        (**self).history(rev)
    }

    fn tree_entries(&self, tree: ObjectId) -> Result<Vec<TreeEntry>> {
        (**self).tree_entries(tree)
    }

    fn read_blob(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        (**self).read_blob(id)
    }

    fn default_branch(&self) -> Option<String> {
        (**self).default_branch()
    }

    fn remote_url(&self) -> Option<String> {
        (**self).remote_url()
    }
}

/// An [`ObjectSource`] over a local git repository.
pub struct GitSource {
    repo: gix::ThreadSafeRepository,
}

impl GitSource {
    /// Discover the repository containing `path`.
    pub fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let repo = gix::ThreadSafeRepository::discover(path.as_ref()).map_err(|e| {
            LoctrailError::Git(format!("Failed to discover git repository: {}", e))
        })?;
        Ok(Self { repo })
    }
}

impl ObjectSource for GitSource {
    fn history(&self, rev: &str) -> Result<Vec<CommitInfo>> {
        let repo = self.repo.to_thread_local();
        let head = repo
            .rev_parse_single(rev.as_bytes())
            .map_err(|e| LoctrailError::RevisionNotFound(format!("{}: {}", rev, e)))?
            .detach();

        let mut commits = Vec::new();
        let mut next = Some(head);
        while let Some(id) = next {
            let commit = repo
                .find_commit(id)
                .map_err(|e| LoctrailError::Git(format!("Failed to find commit {}: {}", id, e)))?;
            let tree = commit
                .tree_id()
                .map_err(|e| LoctrailError::Git(format!("Failed to read tree of {}: {}", id, e)))?
                .detach();
            let author = commit
                .author()
                .map_err(|e| LoctrailError::Git(format!("Failed to read author of {}: {}", id, e)))?;
            let date = author_date(author.time.seconds, author.time.offset).ok_or_else(|| {
                LoctrailError::Git(format!("Commit {} has an out-of-range author date", id))
            })?;
            let message = commit
                .message()
                .map(|m| m.summary().to_string())
                .unwrap_or_default();
            next = commit.parent_ids().next().map(|parent| parent.detach());
            commits.push(CommitInfo {
                id,
                tree,
                date,
                message,
            });
        }

        // Topological order; backdated commits fold into the open day downstream
        commits.reverse();
        Ok(commits)
    }

    fn tree_entries(&self, tree_id: ObjectId) -> Result<Vec<TreeEntry>> {
        let repo = self.repo.to_thread_local();
        let tree = repo
            .find_object(tree_id)
            .map_err(|e| LoctrailError::Git(format!("Failed to find tree {}: {}", tree_id, e)))?
            .try_into_tree()
            .map_err(|_| LoctrailError::Git(format!("Object {} is not a tree", tree_id)))?;

        let mut entries = Vec::new();
        for entry in tree.iter() {
            let entry = entry
                .map_err(|e| LoctrailError::Git(format!("Failed to read tree entry: {}", e)))?;
            let mode = entry.mode();
            let kind = if mode.is_tree() {
                EntryKind::Tree
            } else if mode.is_blob() {
                EntryKind::Blob
            } else {
                EntryKind::Other
            };
            entries.push(TreeEntry {
                name: entry.filename().to_string(),
                kind,
                id: entry.oid().to_owned(),
            });
        }
        Ok(entries)
    }

    fn read_blob(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        let repo = self.repo.to_thread_local();
        let object = match repo.find_object(id) {
            Ok(object) => object,
            Err(e) => {
                tracing::warn!(blob = %id, error = %e, "blob unavailable");
                return Ok(None);
            }
        };
        let blob = match object.try_into_blob() {
            Ok(blob) => Ok(Some(blob.data.clone())),
            Err(_) => Ok(None),
        };
        blob
    }

    fn default_branch(&self) -> Option<String> {
        let repo = self.repo.to_thread_local();
        let name = repo.head_name().ok().flatten()?;
        Some(name.shorten().to_string())
    }

    fn remote_url(&self) -> Option<String> {
        let repo = self.repo.to_thread_local();
        let remote = repo
            .find_default_remote(gix::remote::Direction::Fetch)?
            .ok()?;
        let url = remote.url(gix::remote::Direction::Fetch)?;
        Some(url.to_bstring().to_string())
    }
}

/// Calendar date of an author timestamp in the author's own timezone.
fn author_date(seconds: i64, offset_seconds: i32) -> Option<NaiveDate> {
    let offset = FixedOffset::east_opt(offset_seconds)?;
    let utc = DateTime::from_timestamp(seconds, 0)?;
    Some(utc.with_timezone(&offset).date_naive())
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory object graph for engine tests.

    use std::collections::{BTreeMap, HashMap};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct MemorySource {
        interned: HashMap<Vec<u8>, ObjectId>,
        trees: HashMap<ObjectId, Vec<TreeEntry>>,
        blobs: HashMap<ObjectId, Vec<u8>>,
        commits: Vec<CommitInfo>,
        pub(crate) blob_reads: Mutex<Vec<ObjectId>>,
        pub(crate) tree_reads: Mutex<Vec<ObjectId>>,
    }

    impl MemorySource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        fn intern(&mut self, key: Vec<u8>) -> ObjectId {
            let next = self.interned.len() + 1;
            *self
                .interned
                .entry(key)
                .or_insert_with(|| ObjectId::from_hex(format!("{:040x}", next).as_bytes()).unwrap())
        }

        /// Content id of a blob with this content (interning it).
        pub(crate) fn blob(&mut self, content: &str) -> ObjectId {
            let mut key = b"blob:".to_vec();
            key.extend_from_slice(content.as_bytes());
            let id = self.intern(key);
            self.blobs.insert(id, content.as_bytes().to_vec());
            id
        }

        fn tree(&mut self, files: &[(String, ObjectId)]) -> ObjectId {
            let mut children: BTreeMap<String, Vec<(String, ObjectId)>> = BTreeMap::new();
            let mut entries = Vec::new();
            for (path, id) in files {
                match path.split_once('/') {
                    Some((dir, rest)) => children
                        .entry(dir.to_string())
                        .or_default()
                        .push((rest.to_string(), *id)),
                    None => entries.push(TreeEntry {
                        name: path.clone(),
                        kind: EntryKind::Blob,
                        id: *id,
                    }),
                }
            }
            for (dir, files) in children {
                let id = self.tree(&files);
                entries.push(TreeEntry {
                    name: dir,
                    kind: EntryKind::Tree,
                    id,
                });
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            let mut key = b"tree:".to_vec();
            for entry in &entries {
                key.extend_from_slice(format!("{} {}\n", entry.name, entry.id).as_bytes());
            }
            let id = self.intern(key);
            self.trees.insert(id, entries);
            id
        }

        /// Record a commit whose full tree holds exactly `files`.
        pub(crate) fn commit(&mut self, date: &str, message: &str, files: &[(&str, &str)]) -> ObjectId {
            let files: Vec<(String, ObjectId)> = files
                .iter()
                .map(|(path, content)| (path.to_string(), self.blob(content)))
                .collect();
            let tree = self.tree(&files);
            let id = self.intern(format!("commit:{}", self.commits.len()).into_bytes());
            self.commits.push(CommitInfo {
                id,
                tree,
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                message: message.to_string(),
            });
            id
        }

        pub(crate) fn commits(&self) -> &[CommitInfo] {
            &self.commits
        }

        pub(crate) fn reset_reads(&self) {
            self.blob_reads.lock().clear();
            self.tree_reads.lock().clear();
        }
    }

    impl ObjectSource for MemorySource {
        fn history(&self, rev: &str) -> Result<Vec<CommitInfo>> {
            if rev == "HEAD" {
                return Ok(self.commits.clone());
            }
            // A commit id walks history up to and including that commit
            let end = self
                .commits
                .iter()
                .position(|c| c.id.to_string() == rev)
                .ok_or_else(|| LoctrailError::RevisionNotFound(rev.to_string()))?;
            Ok(self.commits[..=end].to_vec())
        }

        fn tree_entries(&self, tree: ObjectId) -> Result<Vec<TreeEntry>> {
            self.tree_reads.lock().push(tree);
            self.trees
                .get(&tree)
                .cloned()
                .ok_or_else(|| LoctrailError::Git(format!("no tree {}", tree)))
        }

        fn read_blob(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
            self.blob_reads.lock().push(id);
            Ok(self.blobs.get(&id).cloned())
        }

        fn default_branch(&self) -> Option<String> {
            Some("main".to_string())
        }
    }
}
