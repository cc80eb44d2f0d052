//! Incremental tree diffing.
//!
//! Two trees are walked in lock-step with an explicit stack. Whenever both
//! sides of a directory report the same id the whole subtree is skipped, so
//! the work per commit follows the number of changed paths rather than the
//! size of the repository. A cold scan is the diff of an empty tree against
//! the root tree.
//!
//! [`IncrementalContext`] owns the per-path state of one analysis run and is
//! mutated in place by each commit's changes.

use std::collections::{BTreeMap, BTreeSet};

use tokio_util::sync::CancellationToken;

use crate::blobs::BlobPool;
use crate::classify::{classify_path, count_lines, extension, FileClass};
use crate::error::LoctrailError;
use crate::filter::FilterConfig;
use crate::source::{EntryKind, ObjectId, ObjectSource, TreeEntry};
use crate::stats::{FileState, Snapshot};
use crate::Result;

/// Content ids fetched per pool batch; cancellation is checked between batches.
pub const FETCH_BATCH: usize = 512;

/// Type of file change in the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileChangeType {
    /// File was added.
    Added,
    /// File was deleted.
    Deleted,
    /// File was modified.
    Modified,
}

/// One changed blob path between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub change_type: FileChangeType,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
}

/// Both sides of one name inside a directory.
#[derive(Default)]
struct Pair<'a> {
    old: Option<&'a TreeEntry>,
    new: Option<&'a TreeEntry>,
}

fn side(entry: Option<&TreeEntry>, kind: EntryKind) -> Option<ObjectId> {
    entry.filter(|e| e.kind == kind).map(|e| e.id)
}

/// Compute the blob-level changes turning tree `old` into tree `new`.
///
/// `None` stands for the empty tree on either side.
pub fn diff_trees<S: ObjectSource + ?Sized>(
    source: &S,
    old: Option<ObjectId>,
    new: Option<ObjectId>,
) -> Result<Vec<FileChange>> {
    let mut changes = Vec::new();
    let mut stack = vec![(String::new(), old, new)];

    while let Some((prefix, old, new)) = stack.pop() {
        if old == new {
            continue;
        }
        let old_entries = match old {
            Some(id) => source.tree_entries(id)?,
            None => Vec::new(),
        };
        let new_entries = match new {
            Some(id) => source.tree_entries(id)?,
            None => Vec::new(),
        };

        let mut names: BTreeMap<&str, Pair<'_>> = BTreeMap::new();
        for entry in &old_entries {
            names.entry(entry.name.as_str()).or_default().old = Some(entry);
        }
        for entry in &new_entries {
            names.entry(entry.name.as_str()).or_default().new = Some(entry);
        }

        for (name, pair) in names {
            let path = format!("{}{}", prefix, name);

            // A name may switch between tree and blob, so both are handled independently
            let old_tree = side(pair.old, EntryKind::Tree);
            let new_tree = side(pair.new, EntryKind::Tree);
            if (old_tree.is_some() || new_tree.is_some()) && old_tree != new_tree {
                stack.push((format!("{}/", path), old_tree, new_tree));
            }

            let old_blob = side(pair.old, EntryKind::Blob);
            let new_blob = side(pair.new, EntryKind::Blob);
            let change_type = match (old_blob, new_blob) {
                (Some(a), Some(b)) if a == b => continue,
                (Some(_), Some(_)) => FileChangeType::Modified,
                (None, Some(_)) => FileChangeType::Added,
                (Some(_), None) => FileChangeType::Deleted,
                (None, None) => continue,
            };
            changes.push(FileChange {
                path,
                change_type,
                old_id: old_blob,
                new_id: new_blob,
            });
        }
    }

    Ok(changes)
}

/// Outcome counters of applying one commit's changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub upserted: usize,
    pub removed: usize,
    /// Paths dropped by the skip list, the user filter, or binary content
    pub excluded: usize,
}

/// Per-path state of one analysis run.
#[derive(Debug, Default)]
pub struct IncrementalContext {
    files: BTreeMap<String, FileState>,
    known_extensions: BTreeSet<String>,
}

impl IncrementalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileState> {
        self.files.values()
    }

    pub fn get(&self, path: &str) -> Option<&FileState> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Extensions of every file counted so far in this run.
    pub fn known_extensions(&self) -> &BTreeSet<String> {
        &self.known_extensions
    }

    /// Aggregate the whole current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_files(self.files.values())
    }

    /// Apply one commit's changes, fetching added and modified contents as a batch.
    pub fn apply<S: ObjectSource + ?Sized>(
        &mut self,
        source: &S,
        pool: &mut BlobPool,
        filter: &FilterConfig,
        changes: &[FileChange],
        cancel: &CancellationToken,
    ) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        let mut wanted: Vec<(&str, FileClass, ObjectId)> = Vec::new();

        for change in changes {
            let new_id = match (change.change_type, change.new_id) {
                (FileChangeType::Deleted, _) | (_, None) => {
                    if self.files.remove(&change.path).is_some() {
                        stats.removed += 1;
                    }
                    continue;
                }
                (_, Some(id)) => id,
            };

            let class = if filter.matches(&change.path) {
                classify_path(&change.path)
            } else {
                None
            };
            match class {
                Some(class) => wanted.push((&change.path, class, new_id)),
                None => {
                    self.files.remove(&change.path);
                    stats.excluded += 1;
                }
            }
        }

        for batch in wanted.chunks(FETCH_BATCH) {
            if cancel.is_cancelled() {
                return Err(LoctrailError::Cancelled);
            }
            let ids: Vec<ObjectId> = batch.iter().map(|(_, _, id)| *id).collect();
            let contents = pool.fetch(source, &ids);

            for &(path, class, id) in batch {
                let Some(content) = contents.get(&id) else {
                    self.files.remove(path);
                    stats.excluded += 1;
                    continue;
                };
                let counts = count_lines(class, content);
                if let Some(ext) = extension(path) {
                    self.known_extensions.insert(ext);
                }
                self.files.insert(
                    path.to_string(),
                    FileState {
                        path: path.to_string(),
                        content_id: id,
                        language: class.language,
                        lines: counts.lines,
                        test_lines: counts.test_lines,
                    },
                );
                stats.upserted += 1;
            }
        }

        tracing::debug!(
            upserted = stats.upserted,
            removed = stats.removed,
            excluded = stats.excluded,
            tracked = self.files.len(),
            "applied changes"
        );
        Ok(stats)
    }
}
